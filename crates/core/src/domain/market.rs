use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange region of a listing; decides how scraped tickers map to quote symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Us,
    India,
    Uk,
}

impl Region {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Us => "",
            Self::India => ".NS",
            Self::Uk => ".L",
        }
    }

    // Share classes are written "BRK.B" on reference pages but "BRK-B" by the quote provider.
    fn dashes_share_classes(self) -> bool {
        matches!(self, Self::Us | Self::Uk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Builds the quote-provider symbol for a ticker scraped from a `region` listing.
    pub fn from_listing(raw: &str, region: Region) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains(char::is_whitespace) {
            return None;
        }

        let base = if region.dashes_share_classes() {
            raw.replace('.', "-")
        } else {
            raw.to_string()
        };
        Some(Self(format!("{base}{}", region.suffix())))
    }

    /// Parses a user-entered ticker that is already in quote-provider form.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return None;
        }
        Some(Self(s.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ticker without its region suffix.
    pub fn listing_ticker(&self, region: Region) -> &str {
        self.0.strip_suffix(region.suffix()).unwrap_or(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One trading session, as reported by the history provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub session_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn india_listing_round_trips_through_suffix() {
        for raw in ["RELIANCE", "M&M", "BAJAJ-AUTO", "TCS"] {
            let sym = Symbol::from_listing(raw, Region::India).unwrap();
            assert!(sym.as_str().ends_with(".NS"), "{sym}");
            assert_eq!(sym.listing_ticker(Region::India), raw);
        }
    }

    #[test]
    fn us_share_classes_use_dashes() {
        let sym = Symbol::from_listing(" BRK.B\n", Region::Us).unwrap();
        assert_eq!(sym.as_str(), "BRK-B");
    }

    #[test]
    fn uk_listing_gets_london_suffix() {
        let sym = Symbol::from_listing("BT.A", Region::Uk).unwrap();
        assert_eq!(sym.as_str(), "BT-A.L");
    }

    #[test]
    fn rejects_blank_and_multi_word_cells() {
        assert!(Symbol::from_listing("   ", Region::Us).is_none());
        assert!(Symbol::from_listing("Apple Inc", Region::Us).is_none());
        assert!(Symbol::parse("").is_none());
    }

    #[test]
    fn parse_uppercases_user_input() {
        assert_eq!(Symbol::parse(" reliance.ns ").unwrap().as_str(), "RELIANCE.NS");
    }
}
