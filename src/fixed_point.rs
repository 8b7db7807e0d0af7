//! The fixed-point scale shared by the motor engines.
//!
//! Positions, destinations and speeds are carried as [`Q6`] — a signed 32-bit
//! value with 6 fractional bits (the "×64" scale of the wire protocol). The
//! fractional bits let a slow speed advance a position by less than one whole
//! step per tick while the engine still converges exactly.
//!
//! Conversions to and from plain integers happen only at the public API
//! boundary; everything inside the engines stays in `Q6`.

use fixed::types::I26F6;

/// Q25.6 fixed point: 6 fractional bits, the engines' internal unit scale.
pub type Q6 = I26F6;

/// Lowest accepted raw position command (extended range).
pub const COMMAND_MIN: i32 = -512;

/// Highest accepted raw position command (extended range).
pub const COMMAND_MAX: i32 = 1536;

/// Low end of the safe sub-range commands snap to when out of range.
pub const SAFE_MIN: i32 = 0;

/// High end of the safe sub-range commands snap to when out of range.
pub const SAFE_MAX: i32 = 1023;

/// Midpoint of the safe range, used as the neutral startup position.
pub const SAFE_MID: i32 = 512;

/// Lowest accepted speed; zero would stall convergence forever.
pub const SPEED_MIN: i32 = 1;

/// Highest accepted speed; converges any in-range move in one tick.
pub const SPEED_MAX: i32 = 1023;

/// Clamp a raw position command.
///
/// Values inside the extended range pass through; anything outside snaps to
/// the nearest end of the *safe* range, not the extended one, so a wild
/// command can never drive a motor to its mechanical limit.
#[must_use]
pub fn clamp_command(value: i32) -> i32 {
    if value < COMMAND_MIN {
        SAFE_MIN
    } else if value > COMMAND_MAX {
        SAFE_MAX
    } else {
        value
    }
}

/// Clamp a raw speed command to `[SPEED_MIN, SPEED_MAX]`.
#[must_use]
pub fn clamp_speed(value: i32) -> i32 {
    value.clamp(SPEED_MIN, SPEED_MAX)
}

/// A whole number as `Q6`, usable in const contexts where
/// [`Q6::from_num`] is not.
#[must_use]
pub const fn q6(value: i32) -> Q6 {
    Q6::from_bits(value << 6)
}

/// Whole part of a `Q6` value, rounding toward negative infinity.
///
/// Floor (not truncation) keeps step-table indexing cycle-correct for
/// negative positions.
#[must_use]
pub fn whole(value: Q6) -> i32 {
    value.floor().to_num::<i32>()
}
