//! The servo motor control engine.
//!
//! Four channels share a single timer entry. The engine walks the channels
//! round-robin, giving each one a fixed time slot per frame, and inside a slot
//! runs a two-phase pulse machine: drive the channel's pin to the pulse level
//! for `pulse` microseconds, then return it to idle for the remainder of the
//! slot. Each phase reprograms the entry's period from inside the service
//! window, the rearm-from-callback pattern [`FastTimer::set_period`] exists
//! for.
//!
//! Every slot lasts exactly `GAP_US + CYCLE_US` microseconds no matter what
//! the channel's position is, so the frame rate (about 64 Hz) never wobbles
//! as positions change.
//!
//! Positions cross the API in the command range [-512, 1536] (safe range
//! [0, 1023]) and are held internally as pulse widths: command plus a 1000 µs
//! offset, in [`Q6`] fixed point. A channel converges toward its destination
//! by up to `speed` per frame, once per visit of its slot.

use crate::error::{Error, Result};
use crate::fast_timer::FastTimer;
use crate::fixed_point::{
    COMMAND_MAX, COMMAND_MIN, Q6, SAFE_MID, SPEED_MAX, clamp_command, clamp_speed, q6, whole,
};
use crate::motion::MotionProfile;

/// Number of servo channels.
pub const SERVO_COUNT: usize = 4;

/// Microseconds added to a position command to form a pulse width: command 0
/// is a 1000 µs pulse, command 1023 a 2023 µs pulse.
pub const PULSE_OFFSET_US: i32 = 1_000;

/// Longest admissible pulse, microseconds.
const PULSE_MAX_US: i32 = COMMAND_MAX + PULSE_OFFSET_US;

/// Shortest admissible pulse, microseconds.
const PULSE_MIN_US: i32 = COMMAND_MIN + PULSE_OFFSET_US;

/// Pulse width charged against the slot when the position is out of pulse
/// range and the pin is left idle.
const PULSE_FALLBACK_US: i32 = 1_536;

/// Slot time not covered by `CYCLE_US`. Together they pin each slot at
/// 3930 µs, four slots per frame, a hair under 64 frames a second.
const GAP_US: i32 = 1_882;

/// Nominal slot span the pulse is carved out of.
const CYCLE_US: i32 = 2_048;

/// Period of the very first firing after the timer starts, before the first
/// slot reprograms it.
const STARTUP_PERIOD_US: u32 = 2_000;

/// Pin backend for the servo engine. Called from the service path.
pub trait ServoPins {
    /// Drive channel `index` to the pulse level.
    fn pulse_start(&mut self, index: usize);
    /// Return channel `index` to the idle level.
    fn pulse_end(&mut self, index: usize);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    /// Next firing opens a new slot: advance the round-robin, start the pulse.
    Pulse,
    /// Next firing ends the current slot's pulse and waits out its remainder.
    Gap,
}

#[derive(Clone, Copy, Debug)]
struct Channel {
    users: u8,
    motion: MotionProfile,
}

impl Channel {
    const fn fresh() -> Self {
        Self {
            users: 0,
            motion: MotionProfile::new(q6(SAFE_MID + PULSE_OFFSET_US), q6(SPEED_MAX)),
        }
    }
}

/// Servo control engine: a round-robin pulse scheduler over one timer entry.
#[derive(Clone, Debug)]
pub struct ServoEngine {
    channels: [Channel; SERVO_COUNT],
    timer: FastTimer<1>,
    index: usize,
    phase: Phase,
    pulse_us: i32,
}

impl ServoEngine {
    /// All channels disabled, timer idle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channels: [Channel::fresh(); SERVO_COUNT],
            timer: FastTimer::new(),
            // first slot after start belongs to channel 0
            index: SERVO_COUNT - 1,
            phase: Phase::Pulse,
            pulse_us: PULSE_FALLBACK_US,
        }
    }

    fn channel(&self, index: usize) -> Result<&Channel> {
        self.channels.get(index).ok_or(Error::ChannelOutOfRange)
    }

    fn channel_mut(&mut self, index: usize) -> Result<&mut Channel> {
        self.channels.get_mut(index).ok_or(Error::ChannelOutOfRange)
    }

    fn total_users(&self) -> u32 {
        self.channels
            .iter()
            .map(|channel| u32::from(channel.users))
            .sum()
    }

    /// Take a reference on a channel. The first reference resets it to the
    /// neutral midpoint at max speed and returns `true` so the caller can
    /// bring up the pin. The first reference on the whole engine also starts
    /// the frame timer.
    pub fn enable(&mut self, index: usize, now_us: u64) -> Result<bool> {
        let engine_was_idle = self.total_users() == 0;
        let channel = self.channel_mut(index)?;
        let first = channel.users == 0;
        if first {
            *channel = Channel::fresh();
        }
        channel.users = channel.users.saturating_add(1);
        // An armed timer on an idle engine means the previous teardown's
        // final pulse has not ended yet; frames resume from that edge.
        if engine_was_idle && !self.timer.is_armed(0) {
            self.index = SERVO_COUNT - 1;
            self.phase = Phase::Pulse;
            self.pulse_us = PULSE_FALLBACK_US;
            self.timer.start(0, now_us, STARTUP_PERIOD_US, true);
        }
        Ok(first)
    }

    /// Drop a reference on a channel, returning `true` when it was the
    /// channel's last so the caller can release the pin. Dropping the
    /// engine's last reference overall stops the frame timer — but only once
    /// any in-flight pulse has ended, so no pin is left at the pulse level.
    pub fn disable(&mut self, index: usize) -> Result<bool> {
        let channel = self.channel_mut(index)?;
        if channel.users == 0 {
            return Err(Error::TooManyDisables);
        }
        channel.users -= 1;
        let last = channel.users == 0;
        // In the Gap phase a pulse is still high; keep the entry armed so the
        // firing that ends it lands, and let service() stop the timer then.
        if self.total_users() == 0 && self.phase == Phase::Pulse {
            self.timer.stop(0);
        }
        Ok(last)
    }

    /// Whether the channel currently holds any references.
    pub fn active(&self, index: usize) -> Result<bool> {
        Ok(self.channel(index)?.users > 0)
    }

    /// Command the channel toward `target`. The clamped command becomes a
    /// destination pulse width; the channel glides there at its speed, one
    /// increment per frame.
    pub fn set_position(&mut self, index: usize, target: i32) -> Result<()> {
        let pulse = Q6::from_num(clamp_command(target) + PULSE_OFFSET_US);
        self.channel_mut(index)?.motion.set_destination(pulse);
        Ok(())
    }

    /// Set the per-frame increment, clamped to [1, 1023].
    pub fn set_speed(&mut self, index: usize, speed: i32) -> Result<()> {
        let speed = Q6::from_num(clamp_speed(speed));
        self.channel_mut(index)?.motion.set_speed(speed);
        Ok(())
    }

    /// Current position in command units (pulse width minus the offset).
    pub fn position(&self, index: usize) -> Result<i32> {
        Ok(whole(self.channel(index)?.motion.position()) - PULSE_OFFSET_US)
    }

    /// Commanded destination in command units.
    pub fn destination(&self, index: usize) -> Result<i32> {
        Ok(whole(self.channel(index)?.motion.destination()) - PULSE_OFFSET_US)
    }

    /// Per-frame speed as commanded.
    pub fn speed(&self, index: usize) -> Result<i32> {
        Ok(whole(self.channel(index)?.motion.speed()))
    }

    /// When the next phase boundary is due, if the engine is running.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.timer.next_deadline()
    }

    /// Service a due phase boundary and return the next deadline.
    ///
    /// A `Pulse` firing opens the next channel's slot: the channel converges
    /// one increment, its pin goes to the pulse level (skipped when the
    /// position is outside pulse range), and the entry is reprogrammed to the
    /// pulse width. A `Gap` firing returns the pin to idle and reprograms the
    /// entry to the slot's remainder, keeping every slot the same length.
    pub fn service<P: ServoPins>(&mut self, now_us: u64, pins: &mut P) -> Option<u64> {
        for _ in self.timer.advance(now_us) {
            match self.phase {
                Phase::Pulse => {
                    self.index = (self.index + 1) % SERVO_COUNT;
                    let channel = &mut self.channels[self.index];
                    channel.motion.advance();
                    let mut pulse = whole(channel.motion.position());
                    if (PULSE_MIN_US..=PULSE_MAX_US).contains(&pulse) {
                        pins.pulse_start(self.index);
                    } else {
                        // no pulse this frame, but the slot still gets billed
                        pulse = PULSE_FALLBACK_US;
                    }
                    self.pulse_us = pulse;
                    self.timer.set_period(0, pulse as u32);
                    self.phase = Phase::Gap;
                }
                Phase::Gap => {
                    pins.pulse_end(self.index);
                    self.phase = Phase::Pulse;
                    if self.total_users() == 0 {
                        // the last user left mid-pulse; this firing was kept
                        // only to end that pulse
                        self.timer.stop(0);
                    } else {
                        let remainder = GAP_US + CYCLE_US - self.pulse_us;
                        self.timer.set_period(0, remainder as u32);
                    }
                }
            }
        }
        self.timer.next_deadline()
    }
}

impl Default for ServoEngine {
    fn default() -> Self {
        Self::new()
    }
}
