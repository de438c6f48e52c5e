//! Error taxonomy for the backtesting core (spec §7).
//!
//! Three independent enums separate errors by when they can surface:
//! configuration errors at `run()` entry, runtime data errors while a
//! signal or fill is being processed, and replay errors that abort a run.
//! A run never returns `anyhow::Error` from library code; only the CLI
//! boundary wraps these in `anyhow`.

use thiserror::Error;

/// Errors detected synchronously before a run starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingRequiredFields(String),

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("invalid initial capital: {0}")]
    InvalidCapital(String),

    #[error("invalid risk fraction: {0} (must be in (0, 1])")]
    InvalidRiskFraction(String),

    #[error("no symbols configured")]
    EmptySymbols,

    #[error("no strategies configured")]
    EmptyStrategies,

    #[error("parameter grid is empty")]
    EmptyParameterGrid,
}

/// Errors that occur while processing bars, signals, or fills.
///
/// `InvalidStop` and `InsufficientFunds` are recovered locally (the
/// offending signal is dropped with a warning); the rest propagate as
/// run failures because they prevent any further progress.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("no bars found in the requested window")]
    NoBarsInWindow,

    #[error("invalid stop: entry and stop must differ (price_risk must be positive)")]
    InvalidStop,

    #[error("insufficient funds: cannot afford even one share at entry {entry}")]
    InsufficientFunds { entry: String },

    #[error("key levels unavailable for symbol before first bar of the day")]
    LevelsUnavailable,

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("strategy evaluation failed: {0}")]
    Strategy(String),

    #[error("clock has not been started (no bar has been advanced to yet)")]
    ClockNotStarted,
}

/// Transient I/O failures while streaming bars from storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("replay failed: {cause}")]
    ReplayFailed { cause: String },
}

/// A violated invariant: double-close, out-of-order dispatch, etc.
/// These are programming bugs, not recoverable runtime conditions; the
/// marker exists so callers can fail fast and distinguish this from
/// `RuntimeError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("fatal invariant violation: {0}")]
pub struct Fatal(pub String);

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
