//! Timing-critical motor control for Pico 1 and 2: steppers and servos.
//!
//! The crate splits every motor subsystem in two:
//!
//! - a pure **engine** ([`stepper::StepperEngine`], [`servo::ServoEngine`])
//!   holding all channel state and deadline bookkeeping, testable on a
//!   workstation with `--features host`, and
//! - a **driver** ([`stepper_driver::StepperDriver`],
//!   [`servo_driver::ServoDriver`]) binding an engine to real pins, PWM and
//!   the embassy time driver.
//!
//! # Glossary
//!
//! - **Channel:** one motor position slot. Steppers have 2, servos 4.
//! - **Tick/slot:** one firing of a channel's timer entry; steppers tick
//!   every millisecond while moving, servos own one slot per ~16 ms frame.
//! - **Command range:** positions are commanded as integers in [-512, 1536];
//!   out-of-range commands snap into the safe range [0, 1023].
#![cfg_attr(not(feature = "host"), no_std)]
#![cfg_attr(not(feature = "host"), no_main)]

// Compile-time checks: exactly one board must be selected (unless testing with host feature)
#[cfg(all(not(any(feature = "pico1", feature = "pico2")), not(feature = "host")))]
compile_error!("Must enable exactly one board feature: 'pico1' or 'pico2'");

#[cfg(all(feature = "pico1", feature = "pico2"))]
compile_error!("Cannot enable both 'pico1' and 'pico2' features simultaneously");

// Compile-time checks: exactly one architecture must be selected (unless testing with host feature)
#[cfg(all(not(any(feature = "arm", feature = "riscv")), not(feature = "host")))]
compile_error!("Must enable exactly one architecture feature: 'arm' or 'riscv'");

#[cfg(all(feature = "arm", feature = "riscv"))]
compile_error!("Cannot enable both 'arm' and 'riscv' features simultaneously");

// Compile-time check: pico1 only supports ARM
#[cfg(all(feature = "pico1", feature = "riscv"))]
compile_error!("Pico 1 (RP2040) only supports ARM architecture, not RISC-V");

mod error;
pub mod fast_timer;
pub mod fixed_point;
pub mod motion;
pub mod servo;
// These modules require embassy_rp and are excluded when testing on host
#[cfg(not(feature = "host"))]
pub mod servo_driver;
pub mod step_pattern;
pub mod stepper;
#[cfg(not(feature = "host"))]
pub mod stepper_driver;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};
