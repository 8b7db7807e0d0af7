//! Crate-wide error type.
//!
//! Out-of-range *values* (positions, speeds, duty cycles) are clamped by the
//! engines rather than rejected, so a command never leaves a motor in an
//! ambiguous state. Errors here cover programmer mistakes only.

use derive_more::{Display, Error};

/// Errors returned by motion-kit device operations.
#[derive(Clone, Copy, Debug, Display, Error, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A channel index outside `0..COUNT` was passed to a public operation.
    #[display("channel index out of range")]
    ChannelOutOfRange,

    /// `disable` was called more times than `enable` on a channel.
    #[display("channel disabled more times than enabled")]
    TooManyDisables,

    /// The executor refused to spawn a device loop task.
    #[display("failed to spawn device task")]
    TaskSpawn,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
