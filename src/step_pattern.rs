//! Coil energization tables and port-mask aggregation for the stepper engine.
//!
//! A stepper channel drives four lines. For every whole-step position there is
//! one four-line pattern, looked up in one of four tables selected by the
//! drive mode (bipolar/unipolar × full/half step). Full-step tables repeat
//! every 4 steps, half-step tables every 8.
//!
//! Table indexing masks with `cycle - 1` instead of taking a modulo: cycles
//! are powers of two, and the mask stays cycle-correct for negative positions
//! where a signed `%` (truncating toward zero) would walk the table backwards.

use embedded_hal::digital::OutputPin;

const H: bool = true;
const L: bool = false;

/// Steps per electrical cycle in full-step mode.
pub const FULL_STEP_CYCLE: i32 = 4;

/// Steps per electrical cycle in half-step mode.
pub const HALF_STEP_CYCLE: i32 = 8;

/// Four-line drive pattern; `true` drives the line high.
pub type Pattern = [bool; 4];

const BIPOLAR_FULL: [Pattern; 4] = [
    [H, L, H, L],
    [L, H, H, L],
    [L, H, L, H],
    [H, L, L, H],
];

const BIPOLAR_HALF: [Pattern; 8] = [
    [H, L, L, L],
    [H, L, H, L],
    [L, L, H, L],
    [L, H, H, L],
    [L, H, L, L],
    [L, H, L, H],
    [L, L, L, H],
    [H, L, L, H],
];

const UNIPOLAR_FULL: [Pattern; 4] = [
    [H, L, L, L],
    [L, H, L, L],
    [L, L, H, L],
    [L, L, L, H],
];

const UNIPOLAR_HALF: [Pattern; 8] = [
    [H, L, L, L],
    [H, H, L, L],
    [L, H, L, L],
    [L, H, H, L],
    [L, L, H, L],
    [L, L, H, H],
    [L, L, L, H],
    [H, L, L, H],
];

/// Which of the four energization tables a channel uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DriveMode {
    /// Bipolar winding (the default) vs unipolar.
    pub bipolar: bool,
    /// Half stepping (8-step cycle) vs full stepping (4-step cycle).
    pub half_step: bool,
}

impl DriveMode {
    /// Mode of a freshly enabled channel: bipolar, full step.
    #[must_use]
    pub const fn default_mode() -> Self {
        Self {
            bipolar: true,
            half_step: false,
        }
    }

    /// Steps per electrical cycle for this mode. Always a power of two.
    #[must_use]
    pub fn cycle(&self) -> i32 {
        if self.half_step {
            HALF_STEP_CYCLE
        } else {
            FULL_STEP_CYCLE
        }
    }

    fn table(&self) -> &'static [Pattern] {
        match (self.bipolar, self.half_step) {
            (true, false) => &BIPOLAR_FULL,
            (true, true) => &BIPOLAR_HALF,
            (false, false) => &UNIPOLAR_FULL,
            (false, true) => &UNIPOLAR_HALF,
        }
    }
}

/// Pattern for a whole-step `position` in `mode`.
#[must_use]
pub fn pattern_for(mode: DriveMode, position: i32) -> Pattern {
    // cycle is a power of two; the mask wraps negative positions correctly
    let index = (position & (mode.cycle() - 1)) as usize;
    mode.table()[index]
}

/// One aggregated output commit: bits to drive high and bits to drive low.
///
/// Built once per tick so a backend with real port registers can apply the
/// whole pattern in a set write and a clear write, with no intermediate pin
/// states visible.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PortWrite {
    /// Bits to drive high.
    pub set: u32,
    /// Bits to drive low.
    pub clear: u32,
}

/// Aggregate `pattern` into port masks, with `lines[i]` naming the port bit
/// carrying pattern line `i`.
#[must_use]
pub fn port_write(pattern: Pattern, lines: [u8; 4]) -> PortWrite {
    let mut write = PortWrite::default();
    for (drive_high, bit) in pattern.iter().zip(lines) {
        let mask = 1u32 << bit;
        if *drive_high {
            write.set |= mask;
        } else {
            write.clear |= mask;
        }
    }
    write
}

/// Output backend for the stepper engine.
///
/// Called from the tick path, so implementations must complete in bounded,
/// short time. Backends with port-level set/clear registers should apply each
/// mask in a single register write.
pub trait StepBus {
    /// Apply one aggregated pattern commit.
    fn commit(&mut self, write: PortWrite);
}

/// [`StepBus`] over plain [`embedded_hal`] output pins, bit `i` of the port
/// masks mapping to `pins[i]`.
///
/// The pins are written one at a time, so unlike a port-register backend this
/// one can expose intermediate states for a few hundred nanoseconds. Fine for
/// stepper drivers; measure before using it for anything edge-sensitive.
#[derive(Debug)]
pub struct PinBus<O, const W: usize> {
    pins: [O; W],
}

impl<O: OutputPin, const W: usize> PinBus<O, W> {
    /// Bus over `pins`, lowest mask bit first.
    #[must_use]
    pub fn new(pins: [O; W]) -> Self {
        Self { pins }
    }
}

impl<O: OutputPin, const W: usize> StepBus for PinBus<O, W> {
    fn commit(&mut self, write: PortWrite) {
        for (bit, pin) in self.pins.iter_mut().enumerate() {
            let mask = 1u32 << bit;
            if write.set & mask != 0 {
                pin.set_high().ok();
            }
            if write.clear & mask != 0 {
                pin.set_low().ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DriveMode, pattern_for, port_write};

    const ALL_MODES: [DriveMode; 4] = [
        DriveMode {
            bipolar: true,
            half_step: false,
        },
        DriveMode {
            bipolar: true,
            half_step: true,
        },
        DriveMode {
            bipolar: false,
            half_step: false,
        },
        DriveMode {
            bipolar: false,
            half_step: true,
        },
    ];

    #[test]
    fn patterns_repeat_with_the_mode_cycle() {
        for mode in ALL_MODES {
            let cycle = mode.cycle();
            for position in -16..16 {
                assert_eq!(
                    pattern_for(mode, position),
                    pattern_for(mode, position + cycle),
                    "{mode:?} at {position}"
                );
            }
        }
    }

    #[test]
    fn negative_positions_wrap_cycle_correctly() {
        for mode in ALL_MODES {
            let cycle = mode.cycle();
            // -1 must land on the last table entry, as if walking backwards
            assert_eq!(pattern_for(mode, -1), pattern_for(mode, cycle - 1));
            assert_eq!(pattern_for(mode, -cycle), pattern_for(mode, 0));
        }
    }

    #[test]
    fn half_step_interleaves_full_step_bipolar_states() {
        let full = DriveMode {
            bipolar: true,
            half_step: false,
        };
        let half = DriveMode {
            bipolar: true,
            half_step: true,
        };
        // even half-step positions... are the single-coil transitions; the
        // odd ones match the full-step table
        for position in 0..4 {
            assert_eq!(pattern_for(full, position), pattern_for(half, position * 2 + 1));
        }
    }

    #[test]
    fn port_write_masks_are_disjoint_and_cover_all_lines() {
        for mode in ALL_MODES {
            for position in -8..8 {
                let write = port_write(pattern_for(mode, position), [0, 1, 2, 3]);
                assert_eq!(write.set & write.clear, 0);
                assert_eq!(write.set | write.clear, 0b1111);
            }
        }
    }

    #[test]
    fn port_write_places_lines_on_the_requested_bits() {
        let write = port_write([true, false, true, false], [4, 5, 6, 7]);
        assert_eq!(write.set, 0b0101_0000);
        assert_eq!(write.clear, 0b1010_0000);
    }
}
