//! Bar file loading: the CLI's stand-in for a concrete historical bar
//! store backend (spec §6 leaves the storage backend unspecified). Reads
//! a JSON array of `Bar` records, the same shape `Bar` serializes to.

use std::path::Path;

use anyhow::{Context, Result};

use backtest_core::bar::Bar;

pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading bar file {}", path.display()))?;
    let bars: Vec<Bar> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing bar file {} as a JSON array of bars", path.display()))?;
    for bar in &bars {
        bar.validate()
            .with_context(|| format!("invalid bar for {} at {}", bar.symbol, bar.bar_time))?;
    }
    Ok(bars)
}
