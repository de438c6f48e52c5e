//! Bar (OHLCV) data types (spec §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;

/// Which session a bar belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Regular,
    Extended,
}

/// A single one-minute OHLCV record.
///
/// Invariants (checked by [`Bar::validate`], not enforced at construction
/// so that malformed upstream data can be reported rather than panicking):
/// `low <= open, close <= high`, `low <= high`, `volume >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub bar_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub vwap: Option<Decimal>,
    pub trade_count: Option<u64>,
    pub session: Session,
}

/// Why a bar failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarValidationError {
    #[error("low {low} exceeds open {open}")]
    LowAboveOpen { low: Decimal, open: Decimal },
    #[error("low {low} exceeds close {close}")]
    LowAboveClose { low: Decimal, close: Decimal },
    #[error("high {high} below open {open}")]
    HighBelowOpen { high: Decimal, open: Decimal },
    #[error("high {high} below close {close}")]
    HighBelowClose { high: Decimal, close: Decimal },
    #[error("low {low} exceeds high {high}")]
    LowAboveHigh { low: Decimal, high: Decimal },
    #[error("negative volume {0}")]
    NegativeVolume(Decimal),
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<Symbol>,
        bar_time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        session: Session,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            bar_time,
            open,
            high,
            low,
            close,
            volume,
            vwap: None,
            trade_count: None,
            session,
        }
    }

    /// Checks the OHLCV invariants from spec §3.
    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.low > self.open {
            return Err(BarValidationError::LowAboveOpen {
                low: self.low,
                open: self.open,
            });
        }
        if self.low > self.close {
            return Err(BarValidationError::LowAboveClose {
                low: self.low,
                close: self.close,
            });
        }
        if self.high < self.open {
            return Err(BarValidationError::HighBelowOpen {
                high: self.high,
                open: self.open,
            });
        }
        if self.high < self.close {
            return Err(BarValidationError::HighBelowClose {
                high: self.high,
                close: self.close,
            });
        }
        if self.low > self.high {
            return Err(BarValidationError::LowAboveHigh {
                low: self.low,
                high: self.high,
            });
        }
        if self.volume < Decimal::ZERO {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }
        Ok(())
    }

    /// Effective reference price used by `FillType::Vwap` fills, falling
    /// back to the signal price when the bar carries no vwap (spec §4.4).
    pub fn vwap_or(&self, fallback: Decimal) -> Decimal {
        self.vwap.unwrap_or(fallback)
    }
}
