//! The stepper motor control engine.
//!
//! Two channels, each driving four coil lines plus a PWM duty limiting coil
//! current. The engine is pure state: it owns the per-channel
//! position/destination/speed machine and the channel timer entries, and
//! emits aggregated [`PortWrite`] commits through a [`StepBus`]. Hardware
//! (pins, PWM, the actual sleep-until-deadline loop) lives in
//! [`stepper_driver`](crate::stepper_driver).
//!
//! Positions and speeds cross the API as plain integers and are held
//! internally in [`Q6`] fixed point. A channel is *idle* when its position
//! equals its destination and *moving* otherwise; its repeating tick entry is
//! armed exactly while it is moving, so a converged engine schedules nothing.
//!
//! Position targets outside the extended range [-512, 1536] clamp to the safe
//! range [0, 1023]; speeds clamp to [1, 1023]. Out-of-range values are never
//! rejected — a rejected command would leave the motor state ambiguous.

use crate::error::{Error, Result};
use crate::fast_timer::FastTimer;
use crate::fixed_point::{Q6, SAFE_MID, SPEED_MAX, clamp_command, clamp_speed, q6, whole};
use crate::motion::MotionProfile;
use crate::step_pattern::{DriveMode, StepBus, pattern_for, port_write};

/// Number of stepper channels.
pub const STEPPER_COUNT: usize = 2;

/// Tick cadence of a moving channel, microseconds. One step-table advance of
/// up to `speed` happens per tick; 1 ms matches the fastest step rate of the
/// driver hardware.
pub const STEP_TICK_US: u32 = 1_000;

/// Full coil current.
pub const DUTY_MAX: u16 = 1023;

/// Port bits carrying each channel's four coil lines.
const LINES: [[u8; 4]; STEPPER_COUNT] = [[0, 1, 2, 3], [4, 5, 6, 7]];

#[derive(Clone, Copy, Debug)]
struct Channel {
    users: u8,
    motion: MotionProfile,
    duty: u16,
    mode: DriveMode,
    lines: [u8; 4],
}

impl Channel {
    const fn fresh(lines: [u8; 4]) -> Self {
        Self {
            users: 0,
            motion: MotionProfile::new(q6(SAFE_MID), q6(SPEED_MAX)),
            duty: DUTY_MAX,
            mode: DriveMode::default_mode(),
            lines,
        }
    }
}

/// Stepper control engine: per-channel state machines over a shared
/// [`FastTimer`], one timer entry per channel.
#[derive(Clone, Debug)]
pub struct StepperEngine {
    channels: [Channel; STEPPER_COUNT],
    timer: FastTimer<STEPPER_COUNT>,
}

impl StepperEngine {
    /// All channels disabled and idle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channels: [Channel::fresh(LINES[0]), Channel::fresh(LINES[1])],
            timer: FastTimer::new(),
        }
    }

    fn channel(&self, index: usize) -> Result<&Channel> {
        self.channels.get(index).ok_or(Error::ChannelOutOfRange)
    }

    fn channel_mut(&mut self, index: usize) -> Result<&mut Channel> {
        self.channels.get_mut(index).ok_or(Error::ChannelOutOfRange)
    }

    /// Arm the channel's tick entry while it should be running, cancel it
    /// while it should not. Safe to call after any state change.
    fn sync_timer(&mut self, index: usize, now_us: u64) {
        let channel = &self.channels[index];
        if channel.users == 0 {
            // an armed entry on a disabled channel is its pending release
            return;
        }
        let should_run = channel.motion.is_moving();
        if should_run && !self.timer.is_armed(index) {
            self.timer.start(index, now_us, STEP_TICK_US, true);
        } else if !should_run && self.timer.is_armed(index) {
            self.timer.stop(index);
        }
    }

    /// Take a reference on a channel. The first reference resets the channel
    /// to its neutral startup state (mid-range position, max speed, full
    /// duty, bipolar full-step) and returns `true` so the caller can bring up
    /// the hardware. Further references are counted and return `false`.
    pub fn enable(&mut self, index: usize) -> Result<bool> {
        let channel = self.channel_mut(index)?;
        let first = channel.users == 0;
        if first {
            *channel = Channel::fresh(channel.lines);
        }
        channel.users = channel.users.saturating_add(1);
        if first {
            // cancel a release still pending from the previous teardown
            self.timer.stop(index);
        }
        Ok(first)
    }

    /// Drop a reference on a channel. The last reference schedules one final
    /// immediate service that de-energizes the channel's coil lines, and
    /// returns `true` so the caller can release the rest of the hardware.
    pub fn disable(&mut self, index: usize, now_us: u64) -> Result<bool> {
        let channel = self.channel_mut(index)?;
        if channel.users == 0 {
            return Err(Error::TooManyDisables);
        }
        channel.users -= 1;
        let last = channel.users == 0;
        if last {
            // one-shot due now; service() sees users == 0 and clears the
            // lines instead of ticking
            self.timer.start(index, now_us, 0, false);
        }
        Ok(last)
    }

    /// Whether the channel currently holds any references.
    pub fn active(&self, index: usize) -> Result<bool> {
        Ok(self.channel(index)?.users > 0)
    }

    /// Command the channel toward `target` (absolute). Movement begins on the
    /// next tick and proceeds at the channel's speed.
    pub fn set_position(&mut self, index: usize, target: i32, now_us: u64) -> Result<()> {
        let destination = Q6::from_num(clamp_command(target));
        self.channel_mut(index)?.motion.set_destination(destination);
        self.sync_timer(index, now_us);
        Ok(())
    }

    /// Reset where the channel thinks it is, without causing motion. The raw
    /// value is not range-clamped: step counts are allowed to wander outside
    /// the command range through relative moves, and resetting must be able
    /// to name such a position.
    pub fn set_position_now(&mut self, index: usize, position: i32, now_us: u64) -> Result<()> {
        let position = Q6::saturating_from_num(position);
        self.channel_mut(index)?.motion.set_position(position);
        self.sync_timer(index, now_us);
        Ok(())
    }

    /// Relative move: command the channel `delta` steps from its current
    /// position. Negative deltas step backwards; no range clamp applies.
    pub fn step(&mut self, index: usize, delta: i32, now_us: u64) -> Result<()> {
        let channel = self.channel_mut(index)?;
        let destination = channel
            .motion
            .position()
            .saturating_add(Q6::saturating_from_num(delta));
        channel.motion.set_destination(destination);
        self.sync_timer(index, now_us);
        Ok(())
    }

    /// Set the per-tick increment, clamped to [1, 1023]. A zero request is
    /// raised to 1 so a moving channel always converges.
    pub fn set_speed(&mut self, index: usize, speed: i32) -> Result<()> {
        let speed = Q6::from_num(clamp_speed(speed));
        self.channel_mut(index)?.motion.set_speed(speed);
        Ok(())
    }

    /// Store the coil-current duty, clamped to [0, 1023], and return the
    /// stored value for the caller to program into the PWM. Independent of
    /// position; takes effect as soon as the caller reprograms the hardware.
    pub fn set_duty(&mut self, index: usize, duty: i32) -> Result<u16> {
        let duty = duty.clamp(0, i32::from(DUTY_MAX)) as u16;
        self.channel_mut(index)?.duty = duty;
        Ok(duty)
    }

    /// Select bipolar (`true`) or unipolar winding. Takes effect on the next
    /// tick.
    pub fn set_bipolar(&mut self, index: usize, bipolar: bool) -> Result<()> {
        self.channel_mut(index)?.mode.bipolar = bipolar;
        Ok(())
    }

    /// Select half stepping (`true`) or full stepping. Takes effect on the
    /// next tick.
    pub fn set_half_step(&mut self, index: usize, half_step: bool) -> Result<()> {
        self.channel_mut(index)?.mode.half_step = half_step;
        Ok(())
    }

    /// Current position, whole steps.
    pub fn position(&self, index: usize) -> Result<i32> {
        Ok(whole(self.channel(index)?.motion.position()))
    }

    /// Commanded destination, whole steps.
    pub fn destination(&self, index: usize) -> Result<i32> {
        Ok(whole(self.channel(index)?.motion.destination()))
    }

    /// Per-tick speed as commanded.
    pub fn speed(&self, index: usize) -> Result<i32> {
        Ok(whole(self.channel(index)?.motion.speed()))
    }

    /// Stored coil-current duty.
    pub fn duty(&self, index: usize) -> Result<u16> {
        Ok(self.channel(index)?.duty)
    }

    /// Stored winding mode.
    pub fn bipolar(&self, index: usize) -> Result<bool> {
        Ok(self.channel(index)?.mode.bipolar)
    }

    /// Stored stepping mode.
    pub fn half_step(&self, index: usize) -> Result<bool> {
        Ok(self.channel(index)?.mode.half_step)
    }

    /// Whether any channel's tick entry is armed, and when the earliest one
    /// is due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.timer.next_deadline()
    }

    /// Service every channel whose tick is due: advance its position by up to
    /// its speed (never overshooting), commit the new four-line pattern, and
    /// cancel the channel's entry once it has converged. A firing on a
    /// disabled channel is its release: all four lines are driven low.
    /// Returns the next deadline to sleep until.
    pub fn service<B: StepBus>(&mut self, now_us: u64, bus: &mut B) -> Option<u64> {
        for index in self.timer.advance(now_us) {
            let channel = &mut self.channels[index];
            if channel.users == 0 {
                bus.commit(port_write([false; 4], channel.lines));
                continue;
            }
            let reached = channel.motion.advance();
            let pattern = pattern_for(channel.mode, whole(channel.motion.position()));
            bus.commit(port_write(pattern, channel.lines));
            if reached {
                self.timer.stop(index);
            }
        }
        self.timer.next_deadline()
    }
}

impl Default for StepperEngine {
    fn default() -> Self {
        Self::new()
    }
}
