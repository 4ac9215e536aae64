use crate::config::Settings;
use crate::domain::market::{PriceBar, Symbol};
use crate::ingest::client::{Fetch, FetchError};
use crate::ingest::types::{ChartResponse, Lookback};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("malformed history payload: {0}")]
    Parse(String),
}

#[async_trait::async_trait]
pub trait HistoryProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Daily bars ordered oldest to newest. An unknown or delisted symbol may yield an
    /// empty series rather than an error.
    async fn history(
        &self,
        symbol: &Symbol,
        lookback: Lookback,
    ) -> Result<Vec<PriceBar>, HistoryError>;
}

/// Reads daily bars from a chart endpoint (`/v8/finance/chart/{symbol}`).
pub struct ChartHistoryProvider {
    fetch: Arc<dyn Fetch>,
    base_url: String,
}

impl ChartHistoryProvider {
    pub fn from_settings(settings: &Settings, fetch: Arc<dyn Fetch>) -> Self {
        let base_url = settings
            .quote_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(fetch, base_url)
    }

    pub fn new(fetch: Arc<dyn Fetch>, base_url: impl Into<String>) -> Self {
        Self {
            fetch,
            base_url: base_url.into(),
        }
    }

    fn url(&self, symbol: &Symbol, lookback: Lookback) -> Result<String, HistoryError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| HistoryError::Rejected(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| HistoryError::Rejected("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol.as_str()]);
        url.query_pairs_mut()
            .append_pair("range", lookback.range())
            .append_pair("interval", "1d");
        Ok(url.into())
    }
}

#[async_trait::async_trait]
impl HistoryProvider for ChartHistoryProvider {
    fn provider_name(&self) -> &'static str {
        "chart_v8"
    }

    async fn history(
        &self,
        symbol: &Symbol,
        lookback: Lookback,
    ) -> Result<Vec<PriceBar>, HistoryError> {
        let url = self.url(symbol, lookback)?;
        let body = self.fetch.fetch(&url).await?;
        parse_chart(&body)
    }
}

/// Decodes a chart payload, dropping points with any missing OHLC value.
pub fn parse_chart(body: &[u8]) -> Result<Vec<PriceBar>, HistoryError> {
    let res = serde_json::from_slice::<ChartResponse>(body)
        .map_err(|e| HistoryError::Parse(e.to_string()))?;

    if let Some(err) = res.chart.error {
        let detail = err
            .description
            .or(err.code)
            .unwrap_or_else(|| "unknown chart error".to_string());
        return Err(HistoryError::Rejected(detail));
    }

    let Some(result) = res.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(timestamps) = result.timestamp else {
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Err(HistoryError::Parse("chart result has no quote block".to_string()));
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.into_iter().enumerate() {
        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            continue;
        };

        let session_date = chrono::DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| HistoryError::Parse(format!("invalid timestamp {ts}")))?
            .date_naive();

        bars.push(PriceBar {
            session_date,
            open,
            high,
            low,
            close,
        });
    }

    Ok(bars)
}

/// Fetches a five-session window, widening to a month once if the provider returns nothing.
pub async fn history_with_fallback(
    provider: &dyn HistoryProvider,
    symbol: &Symbol,
) -> Result<Vec<PriceBar>, HistoryError> {
    let bars = provider.history(symbol, Lookback::FiveDays).await?;
    if !bars.is_empty() {
        return Ok(bars);
    }

    tracing::debug!(%symbol, "empty 5d history; retrying with 1mo window");
    provider.history(symbol, Lookback::OneMonth).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::client::tests::StaticFetch;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory provider keyed by symbol; unknown symbols fail with HTTP 404.
    #[derive(Default)]
    pub(crate) struct FakeHistory {
        series: HashMap<(String, Lookback), Vec<PriceBar>>,
        pub(crate) calls: Mutex<Vec<(String, Lookback)>>,
    }

    impl FakeHistory {
        pub(crate) fn with(mut self, symbol: &str, lookback: Lookback, bars: Vec<PriceBar>) -> Self {
            self.series.insert((symbol.to_string(), lookback), bars);
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl HistoryProvider for FakeHistory {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn history(
            &self,
            symbol: &Symbol,
            lookback: Lookback,
        ) -> Result<Vec<PriceBar>, HistoryError> {
            let key = (symbol.as_str().to_string(), lookback);
            self.calls.lock().unwrap().push(key.clone());
            self.series.get(&key).cloned().ok_or_else(|| {
                HistoryError::Fetch(FetchError::Status {
                    url: format!("fake://{}", symbol),
                    status: 404,
                })
            })
        }
    }

    fn chart_body() -> String {
        json!({
            "chart": {
                "result": [{
                    "timestamp": [1772442000, 1772528400, 1772614800],
                    "indicators": {
                        "quote": [{
                            "open":  [100.0, null, 106.0],
                            "high":  [110.0, 108.0, 109.0],
                            "low":   [100.0, 101.0, 104.0],
                            "close": [105.0, 107.0, 108.0],
                            "volume": [10, 20, 30]
                        }]
                    }
                }],
                "error": null
            }
        })
        .to_string()
    }

    #[test]
    fn parses_chart_and_skips_incomplete_points() {
        let bars = parse_chart(chart_body().as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[1].close, 108.0);
        assert!(bars[0].session_date < bars[1].session_date);
    }

    #[test]
    fn missing_timestamps_is_an_empty_series() {
        let body = json!({
            "chart": {"result": [{"indicators": {"quote": [{}]}}], "error": null}
        })
        .to_string();
        assert!(parse_chart(body.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn chart_error_object_is_rejected() {
        let body = json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}
        })
        .to_string();
        assert_eq!(
            parse_chart(body.as_bytes()),
            Err(HistoryError::Rejected(
                "No data found, symbol may be delisted".to_string()
            ))
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_chart(b"<html>blocked</html>"),
            Err(HistoryError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn builds_chart_url_with_range() {
        let url = "https://quotes.test/v8/finance/chart/M&M.NS?range=5d&interval=1d";
        let fetch = Arc::new(StaticFetch::default().with_page(url, &chart_body()));
        let provider = ChartHistoryProvider::new(fetch.clone(), "https://quotes.test");

        let sym = Symbol::parse("M&M.NS").unwrap();
        let bars = provider.history(&sym, Lookback::FiveDays).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(fetch.requests.lock().unwrap()[0], url);
    }

    #[tokio::test]
    async fn fallback_widens_window_only_when_empty() {
        let sym = Symbol::parse("RELIANCE.NS").unwrap();
        let month = vec![PriceBar {
            session_date: NaiveDate::from_ymd_opt(2026, 2, 27).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
        }];
        let provider = FakeHistory::default()
            .with("RELIANCE.NS", Lookback::FiveDays, vec![])
            .with("RELIANCE.NS", Lookback::OneMonth, month.clone());

        let bars = history_with_fallback(&provider, &sym).await.unwrap();
        assert_eq!(bars, month);
        assert_eq!(provider.call_count(), 2);

        let provider = FakeHistory::default().with("RELIANCE.NS", Lookback::FiveDays, month.clone());
        history_with_fallback(&provider, &sym).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }
}
