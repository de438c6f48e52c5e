//! Strategy contract and registry (spec §4.3).

use std::collections::HashMap;
use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::bar::Bar;
use crate::error::RuntimeError;
use crate::key_levels::KeyLevels;
use crate::signal::Setup;

/// Parameters passed to every strategy invocation alongside the rolling
/// window and key levels.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    pub min_rr: Option<Decimal>,
    pub extra: HashMap<String, String>,
}

impl StrategyParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// The strategy contract (spec §4.3): a pure function of the rolling bar
/// window, today's key levels, and configured parameters, returning zero
/// or more candidate `Setup`s.
pub trait Strategy: Send + Sync {
    /// Stable identifier recorded on every `Setup` this strategy emits.
    fn id(&self) -> &str;

    fn evaluate(
        &self,
        window: &VecDeque<Bar>,
        levels: &KeyLevels,
        params: &StrategyParams,
    ) -> Result<Vec<Setup>, RuntimeError>;
}

/// Maps strategy id to the registered implementation (spec §6 "strategy
/// registry" external interface).
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.insert(strategy.id().to_string(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<&dyn Strategy> {
        self.strategies.get(id).map(|b| b.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
