use crate::domain::market::Symbol;
use crate::domain::signal::{try_compute_signal, Signal, SignalError};
use crate::ingest::provider::{HistoryError, HistoryProvider};
use crate::ingest::types::Lookback;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SAMPLE_STRIDE: usize = 10;
pub const DEFAULT_TOP_N: usize = 5;

// Only the first few per-symbol failures of a pass are logged individually.
const LOGGED_FAILURES: usize = 5;

/// What a ranking pass does when one symbol cannot produce a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    SkipOnFailure,
    Abort,
}

#[derive(Debug, Clone)]
pub struct RankOptions {
    pub sample_stride: usize,
    pub top_n: usize,
    pub lookback: Lookback,
    /// Pause between consecutive history requests.
    pub request_delay: Duration,
    pub on_failure: FailurePolicy,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            top_n: DEFAULT_TOP_N,
            lookback: Lookback::FiveDays,
            request_delay: Duration::ZERO,
            on_failure: FailurePolicy::SkipOnFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SymbolFailure {
    #[error("{symbol}: {source}")]
    History {
        symbol: Symbol,
        #[source]
        source: HistoryError,
    },
    #[error("{symbol}: {source}")]
    Signal {
        symbol: Symbol,
        #[source]
        source: SignalError,
    },
}

/// Signals ordered by descending absolute day-over-day change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedList(Vec<Signal>);

impl RankedList {
    /// Sorts by `|change_pct|` descending and keeps the first `top_n`. The sort is stable,
    /// so ties keep their input order.
    pub fn from_signals(mut signals: Vec<Signal>, top_n: usize) -> Self {
        signals.sort_by(|a, b| b.change_pct.abs().total_cmp(&a.change_pct.abs()));
        signals.truncate(top_n);
        Self(signals)
    }

    pub fn signals(&self) -> &[Signal] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON rendering used as context for text generation.
    pub fn snapshot_json(&self) -> String {
        let rows: Vec<_> = self
            .0
            .iter()
            .map(|s| {
                serde_json::json!({
                    "symbol": s.symbol,
                    "price": round2(s.price),
                    "change_pct": round2(s.change_pct),
                    "entry": round2(s.entry),
                    "target": round2(s.target),
                    "stop": round2(s.stop),
                })
            })
            .collect();
        serde_json::Value::Array(rows).to_string()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Every `stride`-th symbol starting from the first. A stride of 0 is treated as 1.
pub fn sample_evenly(symbols: &[Symbol], stride: usize) -> Vec<&Symbol> {
    symbols.iter().step_by(stride.max(1)).collect()
}

/// Fetches history for an evenly spaced sample of `symbols`, one request at a time, and
/// ranks the resulting signals.
///
/// With [`FailurePolicy::SkipOnFailure`] this never returns `Err`; symbols that fail to
/// fetch or compute are left out, and if none survive the list is empty.
pub async fn rank_top_movers(
    provider: &dyn HistoryProvider,
    symbols: &[Symbol],
    opts: &RankOptions,
) -> Result<RankedList, SymbolFailure> {
    let sample = sample_evenly(symbols, opts.sample_stride);
    let mut signals = Vec::with_capacity(sample.len());
    let mut failures: usize = 0;

    for (idx, symbol) in sample.iter().enumerate() {
        if idx != 0 && !opts.request_delay.is_zero() {
            tokio::time::sleep(opts.request_delay).await;
        }

        match signal_for(provider, symbol, opts.lookback).await {
            Ok(signal) => signals.push(signal),
            Err(err) => {
                if opts.on_failure == FailurePolicy::Abort {
                    return Err(err);
                }
                failures += 1;
                if failures <= LOGGED_FAILURES {
                    tracing::warn!(
                        idx,
                        provider = provider.provider_name(),
                        failure_count = failures,
                        error = %err,
                        "signal unavailable; skipping symbol"
                    );
                }
            }
        }
    }

    tracing::info!(
        universe = symbols.len(),
        sampled = sample.len(),
        survivors = signals.len(),
        failures,
        "ranking pass complete"
    );

    Ok(RankedList::from_signals(signals, opts.top_n))
}

async fn signal_for(
    provider: &dyn HistoryProvider,
    symbol: &Symbol,
    lookback: Lookback,
) -> Result<Signal, SymbolFailure> {
    let bars = provider
        .history(symbol, lookback)
        .await
        .map_err(|source| SymbolFailure::History {
            symbol: symbol.clone(),
            source,
        })?;

    try_compute_signal(symbol, &bars).map_err(|source| SymbolFailure::Signal {
        symbol: symbol.clone(),
        source,
    })
}
