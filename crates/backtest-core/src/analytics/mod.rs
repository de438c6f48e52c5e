//! Analytics Pipeline (spec §4.8): pure functions over the closed-trade
//! ledger and equity curve. No component here holds state; re-running any
//! function on the same ledger produces identical output (spec §8
//! idempotence).

pub mod drawdown;
pub mod equity_curve;
pub mod signal_analysis;
pub mod time_analysis;
pub mod trade_metrics;

pub use drawdown::Drawdown;
pub use equity_curve::EquityCurveMetrics;
pub use signal_analysis::SignalAnalysis;
pub use time_analysis::TimeAnalysis;
pub use trade_metrics::TradeMetrics;
