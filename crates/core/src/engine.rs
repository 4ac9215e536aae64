//! Process-scoped facade over the universe, ranking, lookup, and AI paths.

use crate::cache::{cache_key, TtlCache};
use crate::config::{env_or, Settings};
use crate::domain::market::{PriceBar, Symbol};
use crate::domain::ranking::{
    rank_top_movers, RankOptions, RankedList, SymbolFailure, DEFAULT_SAMPLE_STRIDE,
    DEFAULT_TOP_N,
};
use crate::domain::signal::{try_compute_signal, Signal};
use crate::ingest::client::{Fetch, FetchClient};
use crate::ingest::provider::{history_with_fallback, ChartHistoryProvider, HistoryError, HistoryProvider};
use crate::ingest::universe::{MarketIndex, Universe, UniverseSource};
use crate::llm::caller::ResilientCaller;
use crate::llm::gemini::GeminiClient;
use crate::llm::AiResult;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rank: RankOptions,
    pub universe_ttl: Duration,
    pub rank_ttl: Duration,
    pub history_ttl: Duration,
    pub ai_api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rank: RankOptions::default(),
            universe_ttl: Duration::from_secs(3600),
            rank_ttl: Duration::from_secs(600),
            history_ttl: Duration::from_secs(3600),
            ai_api_key: None,
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        let rank = RankOptions {
            sample_stride: env_or("RANK_SAMPLE_STRIDE", DEFAULT_SAMPLE_STRIDE),
            top_n: env_or("RANK_TOP_N", DEFAULT_TOP_N),
            request_delay: Duration::from_millis(env_or("RANK_REQ_DELAY_MS", 0)),
            ..RankOptions::default()
        };

        Self {
            rank,
            universe_ttl: secs_or("UNIVERSE_TTL_SECS", defaults.universe_ttl),
            rank_ttl: secs_or("RANK_TTL_SECS", defaults.rank_ttl),
            history_ttl: secs_or("HISTORY_TTL_SECS", defaults.history_ttl),
            ai_api_key: settings.gemini_api_key.clone(),
        }
    }
}

fn secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

/// Result of a ranking pass as handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct MoversReport {
    pub index: MarketIndex,
    pub ranked: RankedList,
    /// Set when no signals could be produced; the caller should show a "data
    /// unavailable" state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum PassError {
    #[error(transparent)]
    Symbol(#[from] SymbolFailure),
    #[error("no symbol in the sample produced a signal")]
    NoSignals,
}

pub struct Engine {
    universe: UniverseSource,
    history: Arc<dyn HistoryProvider>,
    ai: ResilientCaller,
    config: EngineConfig,
    universe_cache: TtlCache<Vec<Symbol>>,
    rank_cache: TtlCache<RankedList>,
    history_cache: TtlCache<Vec<PriceBar>>,
}

impl Engine {
    pub fn new(
        universe: UniverseSource,
        history: Arc<dyn HistoryProvider>,
        ai: ResilientCaller,
        config: EngineConfig,
    ) -> Self {
        Self {
            universe,
            history,
            ai,
            config,
            universe_cache: TtlCache::new(),
            rank_cache: TtlCache::new(),
            history_cache: TtlCache::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let fetch: Arc<dyn Fetch> = Arc::new(FetchClient::from_settings(settings)?);
        let history = Arc::new(ChartHistoryProvider::from_settings(settings, fetch.clone()));
        let backend = Arc::new(GeminiClient::from_settings(settings)?);

        Ok(Self::new(
            UniverseSource::new(fetch),
            history,
            ResilientCaller::from_env(backend),
            EngineConfig::from_settings(settings),
        ))
    }

    pub fn ai_configured(&self) -> bool {
        self.config.ai_api_key.is_some()
    }

    pub async fn universe(&self, index: MarketIndex) -> Universe {
        let key = cache_key("universe", &[index.name()]);
        let result = self
            .universe_cache
            .get_or_try_compute(&key, self.config.universe_ttl, || {
                self.universe.fetch_constituents(index)
            })
            .await;
        if let Err(err) = &result {
            tracing::warn!(%index, error = %err, "universe unavailable");
        }
        Universe::from_result(index, result)
    }

    pub async fn top_movers(&self, index: MarketIndex) -> MoversReport {
        let universe = self.universe(index).await;
        if let Some(err) = universe.error {
            return MoversReport {
                index,
                ranked: RankedList::default(),
                unavailable: Some(err.to_string()),
            };
        }

        let opts = &self.config.rank;
        let stride = opts.sample_stride.to_string();
        let top_n = opts.top_n.to_string();
        let key = cache_key(
            "top_movers",
            &[index.name(), stride.as_str(), top_n.as_str()],
        );

        let ranked = self
            .rank_cache
            .get_or_try_compute(&key, self.config.rank_ttl, || {
                self.rank_pass(&universe.symbols)
            })
            .await;

        match ranked {
            Ok(ranked) => MoversReport {
                index,
                ranked,
                unavailable: None,
            },
            Err(err) => {
                tracing::warn!(%index, error = %err, "ranking pass produced no signals");
                MoversReport {
                    index,
                    ranked: RankedList::default(),
                    unavailable: Some(err.to_string()),
                }
            }
        }
    }

    // Empty passes are errors so that the cache skips them and an outage is retried on the
    // next read.
    async fn rank_pass(&self, symbols: &[Symbol]) -> Result<RankedList, PassError> {
        let ranked = rank_top_movers(self.history.as_ref(), symbols, &self.config.rank).await?;
        if ranked.is_empty() {
            return Err(PassError::NoSignals);
        }
        Ok(ranked)
    }

    /// Signal for a single ticker. `Ok(None)` means the provider has too little data.
    pub async fn ticker_signal(&self, symbol: &Symbol) -> Result<Option<Signal>, HistoryError> {
        let key = cache_key("history", &[symbol.as_str()]);
        let bars = self
            .history_cache
            .get_or_try_compute(&key, self.config.history_ttl, || {
                history_with_fallback(self.history.as_ref(), symbol)
            })
            .await?;

        match try_compute_signal(symbol, &bars) {
            Ok(signal) => Ok(Some(signal)),
            Err(err) => {
                tracing::debug!(%symbol, error = %err, "no signal for ticker");
                Ok(None)
            }
        }
    }

    /// Free-text question about a ranked list.
    pub async fn ask(&self, prompt: &str, ranked: &RankedList) -> AiResult {
        let Some(api_key) = self.config.ai_api_key.as_deref() else {
            return AiResult::Unavailable("GEMINI_API_KEY is not configured".to_string());
        };
        self.ai.generate(prompt, &ranked.snapshot_json(), api_key).await
    }

    pub async fn clear_caches(&self) {
        self.universe_cache.clear().await;
        self.rank_cache.clear().await;
        self.history_cache.clear().await;
        self.ai.clear_model_cache().await;
        tracing::info!("engine caches cleared");
    }
}
