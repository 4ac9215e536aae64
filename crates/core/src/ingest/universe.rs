use crate::domain::market::{Region, Symbol};
use crate::ingest::client::{Fetch, FetchError};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketIndex {
    Sp500,
    Nifty50,
    Ftse100,
}

impl MarketIndex {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sp500 => "sp500",
            Self::Nifty50 => "nifty50",
            Self::Ftse100 => "ftse100",
        }
    }

    pub fn reference_url(self) -> &'static str {
        match self {
            Self::Sp500 => "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies",
            Self::Nifty50 => "https://en.wikipedia.org/wiki/NIFTY_50",
            Self::Ftse100 => "https://en.wikipedia.org/wiki/FTSE_100_Index",
        }
    }

    /// Header labels accepted for the symbol column, in preference order.
    pub fn symbol_columns(self) -> &'static [&'static str] {
        match self {
            Self::Sp500 => &["Symbol", "Ticker"],
            Self::Nifty50 => &["Symbol", "NSE Symbol"],
            Self::Ftse100 => &["Ticker", "EPIC", "Symbol"],
        }
    }

    pub fn region(self) -> Region {
        match self {
            Self::Sp500 => Region::Us,
            Self::Nifty50 => Region::India,
            Self::Ftse100 => Region::Uk,
        }
    }
}

impl fmt::Display for MarketIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MarketIndex {
    type Err = UniverseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sp500" | "spx" => Ok(Self::Sp500),
            "nifty50" | "nifty" => Ok(Self::Nifty50),
            "ftse100" | "ftse" => Ok(Self::Ftse100),
            _ => Err(UniverseError::UnknownIndex(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UniverseError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to parse constituents page: {0}")]
    Parse(String),
    #[error("unknown index: {0}")]
    UnknownIndex(String),
}

/// Constituent list for one index. `error` is set whenever `symbols` is empty because the
/// lookup failed.
#[derive(Debug, Clone)]
pub struct Universe {
    pub index: MarketIndex,
    pub symbols: Vec<Symbol>,
    pub error: Option<UniverseError>,
}

impl Universe {
    pub fn from_result(index: MarketIndex, result: Result<Vec<Symbol>, UniverseError>) -> Self {
        match result {
            Ok(symbols) => Self {
                index,
                symbols,
                error: None,
            },
            Err(error) => Self {
                index,
                symbols: Vec::new(),
                error: Some(error),
            },
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.error.is_some()
    }
}

pub struct UniverseSource {
    fetch: Arc<dyn Fetch>,
}

impl UniverseSource {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }

    pub async fn fetch_constituents(&self, index: MarketIndex) -> Result<Vec<Symbol>, UniverseError> {
        let body = self.fetch.fetch(index.reference_url()).await?;
        let html = String::from_utf8_lossy(&body);
        let symbols = parse_constituents(&html, index)?;
        tracing::info!(%index, count = symbols.len(), "loaded index constituents");
        Ok(symbols)
    }

    /// Fail-closed variant of [`Self::fetch_constituents`]: never a partial list.
    pub async fn list_constituents(&self, index: MarketIndex) -> Universe {
        let result = self.fetch_constituents(index).await;
        if let Err(err) = &result {
            tracing::warn!(%index, error = %err, "constituent lookup failed");
        }
        Universe::from_result(index, result)
    }
}

/// Picks the first table whose header row carries one of the index's symbol labels.
pub fn parse_constituents(html: &str, index: MarketIndex) -> Result<Vec<Symbol>, UniverseError> {
    let doc = Html::parse_document(html);
    let tables = selector("table")?;
    let rows = selector("tr")?;
    let cells = selector("th, td")?;

    let labels = index.symbol_columns();
    let region = index.region();

    for table in doc.select(&tables) {
        let mut table_rows = table.select(&rows);
        let Some(header) = table_rows.next() else {
            continue;
        };

        let headers: Vec<String> = header.select(&cells).map(header_label).collect();
        let Some(col) = labels
            .iter()
            .find_map(|label| headers.iter().position(|h| h.eq_ignore_ascii_case(label)))
        else {
            continue;
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in table_rows {
            let Some(cell) = row.select(&cells).nth(col) else {
                continue;
            };
            if let Some(symbol) = Symbol::from_listing(&cell_text(cell), region) {
                if seen.insert(symbol.clone()) {
                    out.push(symbol);
                }
            }
        }

        if !out.is_empty() {
            return Ok(out);
        }
    }

    Err(UniverseError::Parse(format!(
        "no table with a non-empty {labels:?} column for {index}"
    )))
}

fn selector(css: &str) -> Result<Selector, UniverseError> {
    Selector::parse(css).map_err(|e| UniverseError::Parse(format!("bad selector {css}: {e}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

// Header cells may carry footnote markers such as "Symbol[1]".
fn header_label(cell: ElementRef<'_>) -> String {
    let text = cell_text(cell);
    text.split('[').next().unwrap_or_default().trim().to_string()
}
