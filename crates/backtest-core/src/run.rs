//! Run configuration and metadata (spec §3, §7).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::symbol::Symbol;

/// Where a run currently stands (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Everything required to launch one backtest, validated once at entry
/// (spec §7: configuration errors are surfaced synchronously before any
/// bar is replayed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRunConfig {
    pub symbols: Vec<Symbol>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub strategy_ids: Vec<String>,
    pub strategy_params: HashMap<String, String>,
    pub initial_capital: Decimal,
    pub risk_per_trade: Decimal,
    pub unlimited_capital: bool,
}

impl BacktestRunConfig {
    /// Validates the configuration, raising the `ConfigError` variants
    /// from spec §7 before any component is constructed.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.symbols.is_empty() {
            return Err(ConfigError::EmptySymbols);
        }
        if self.strategy_ids.is_empty() {
            return Err(ConfigError::EmptyStrategies);
        }
        if self.start_date > self.end_date {
            return Err(ConfigError::InvalidDateRange {
                start: self.start_date.to_string(),
                end: self.end_date.to_string(),
            });
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::InvalidCapital(self.initial_capital.to_string()));
        }
        if !self.unlimited_capital && (self.risk_per_trade <= Decimal::ZERO || self.risk_per_trade > Decimal::ONE) {
            return Err(ConfigError::InvalidRiskFraction(self.risk_per_trade.to_string()));
        }
        Ok(())
    }
}

/// Run metadata (spec §3): identity, progress, and lifecycle timestamps.
/// Mutated by the Coordinator as the run advances; never by analytics
/// or engine components directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: String,
    pub config: BacktestRunConfig,
    pub status: RunStatus,
    pub progress_pct: Decimal,
    pub current_date: Option<NaiveDate>,
    pub bars_processed: u64,
    pub signals_generated: u64,
    pub trades_opened: u64,
    pub trades_closed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl BacktestRun {
    pub fn new(id: String, config: BacktestRunConfig) -> Self {
        Self {
            id,
            config,
            status: RunStatus::Pending,
            progress_pct: Decimal::ZERO,
            current_date: None,
            bars_processed: 0,
            signals_generated: 0,
            trades_opened: 0,
            trades_closed: 0,
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Running;
        self.started_at = Some(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.progress_pct = Decimal::from(100);
        self.finished_at = Some(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
        self.finished_at = Some(now);
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_config() -> BacktestRunConfig {
        BacktestRunConfig {
            symbols: vec!["SPY".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            strategy_ids: vec!["always_long".to_string()],
            strategy_params: HashMap::new(),
            initial_capital: dec!(100_000),
            risk_per_trade: dec!(0.01),
            unlimited_capital: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_symbols_rejected() {
        let mut cfg = valid_config();
        cfg.symbols.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptySymbols));
    }

    #[test]
    fn inverted_date_range_rejected() {
        let mut cfg = valid_config();
        cfg.end_date = cfg.start_date - chrono::Duration::days(1);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidDateRange { .. })));
    }

    #[test]
    fn risk_fraction_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.risk_per_trade = dec!(1.5);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidRiskFraction(_))));
    }

    #[test]
    fn unlimited_capital_skips_risk_fraction_check() {
        let mut cfg = valid_config();
        cfg.unlimited_capital = true;
        cfg.risk_per_trade = dec!(0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn lifecycle_transitions_set_timestamps() {
        let mut run = BacktestRun::new("run-1".to_string(), valid_config());
        let t0 = Utc::now();
        run.mark_running(t0);
        assert_eq!(run.status, RunStatus::Running);
        run.mark_completed(t0);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress_pct, dec!(100));
    }
}
