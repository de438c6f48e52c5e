//! Backtest Engine - replay, signal collection, simulation, and
//! optimization orchestration for the intraday backtesting core.
//!
//! - `store`: the historical bar read interface the replayer pulls from
//! - `replayer`: the Bar Replayer, the only component that advances time
//! - `collector`: the Signal Collector (rolling window, key levels, strategy dispatch)
//! - `simulator`: the Trade Simulator (exit-manager application, time exit, entry fills)
//! - `coordinator`: wires the above plus the Virtual Account into one run
//! - `optimizer`: parameter-grid and walk-forward optimization on top of the coordinator
//! - `progress`: the throttled progress channel shared by replay and optimization

pub mod collector;
pub mod coordinator;
pub mod optimizer;
pub mod progress;
pub mod replayer;
pub mod simulator;
pub mod store;

pub use collector::SignalCollector;
pub use coordinator::{run_backtest, spawn_backtest, ExecutionSettings, RunError, RunHandle, RunOutcome};
pub use progress::{ProgressCallback, ProgressPayload, ThrottledProgress};
pub use replayer::{BarReplayer, ReplayOutcome, ReplayState};
pub use simulator::TradeSimulator;
pub use store::{HistoricalBarStore, InMemoryBarStore, SessionFilter};
