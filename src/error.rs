//! # Coupling Errors
//!
//! Every structural failure of a coupled run surfaces as a [`CouplingError`].
//! None of them are retried: a boundary series torn halfway through an
//! iteration cannot be resumed, so the scheduler aborts and the binary exits.
//!
//! The one recoverable condition, a decreasing inflow volume, is not an error
//! at all; it is reported as an [`crate::exchange::ExchangeWarning`] and logged.

use crate::Quantity;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CouplingError {
    /// A time series with no samples was queried or constructed
    #[error("time series is empty")]
    EmptySeries,

    /// Query time lies beyond the last sample of the window (no forward extrapolation)
    #[error("query time {time} is beyond the end of the series ({last})")]
    OutOfRange { time: f64, last: f64 },

    /// A new sample does not come strictly after the current one
    #[error("non-monotonic exchange for {quantity}: new time {new_time} is not after {current_time}")]
    NonMonotonicExchange {
        quantity: Quantity,
        new_time: f64,
        current_time: f64,
    },

    /// Coupling mode string is not one of `Adn`, `ndA`, `AdndA`, `ndAdn`
    #[error("unknown coupling mode '{0}' (expected one of Adn, ndA, AdndA, ndAdn)")]
    UnknownCouplingMode(String),

    /// Ranks reached different collectives at the same logical point
    #[error("collective mismatch on rank {rank}: {detail}")]
    CollectiveMismatch { rank: usize, detail: String },

    #[error("times and values differ in length ({times} vs {values})")]
    LengthMismatch { times: usize, values: usize },

    #[error("series times are not strictly increasing at index {index}")]
    NotIncreasing { index: usize },

    #[error("series window needs at least {min} samples, got {len}")]
    WindowTooShort { len: usize, min: usize },

    /// A model clock went backwards or failed to advance
    #[error("clock invariant violated: {0}")]
    ClockInvariant(String),

    /// No rank contributed a value for the coupled boundary
    #[error("no rank owns the coupled boundary for {0}")]
    EmptyBoundary(Quantity),

    /// A step size, length or tolerance that would stall or corrupt the run
    #[error("invalid {name}: {value}")]
    InvalidSetting { name: &'static str, value: f64 },

    #[error("boundary string {id} does not exist ({available} configured)")]
    UnknownBoundary { id: usize, available: usize },

    /// Boundary file operations failed
    #[error("boundary IO: {0}")]
    Io(#[from] io::Error),

    #[error("report serialization: {0}")]
    Report(#[from] serde_json::Error),
}
