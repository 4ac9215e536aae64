use crate::domain::market::{PriceBar, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stop sits 1.5% below the entry level.
pub const STOP_BUFFER: f64 = 0.985;

/// Day-over-day move plus floor-trader pivot levels derived from the prior session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub session_date: NaiveDate,
    pub price: f64,
    pub change_pct: f64,
    pub pivot: f64,
    /// Support (S1).
    pub entry: f64,
    /// Resistance (R1).
    pub target: f64,
    pub stop: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setup {
    InRange,
    Overextended,
    BelowStop,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error("need at least 2 price bars, got {0}")]
    InsufficientData(usize),
    #[error("prior session close is zero")]
    ZeroPriorClose,
    #[error("price bars contain non-finite values")]
    NonFinite,
}

impl Signal {
    /// Remaining distance to the target, as a percentage of the current price.
    pub fn upside_pct(&self) -> f64 {
        if self.price == 0.0 {
            return 0.0;
        }
        (self.target - self.price) / self.price * 100.0
    }

    pub fn setup(&self) -> Setup {
        if self.price >= self.target {
            Setup::Overextended
        } else if self.price < self.stop {
            Setup::BelowStop
        } else {
            Setup::InRange
        }
    }
}

/// Computes a signal from bars ordered oldest to newest.
///
/// The pivot base is the second-to-last bar (the most recently closed session); the
/// last bar only contributes the current price.
pub fn try_compute_signal(symbol: &Symbol, bars: &[PriceBar]) -> Result<Signal, SignalError> {
    let [.., prior, last] = bars else {
        return Err(SignalError::InsufficientData(bars.len()));
    };

    let inputs = [prior.high, prior.low, prior.close, last.close];
    if inputs.iter().any(|v| !v.is_finite()) {
        return Err(SignalError::NonFinite);
    }
    if prior.close == 0.0 {
        return Err(SignalError::ZeroPriorClose);
    }

    let change_pct = (last.close - prior.close) / prior.close * 100.0;
    let pivot = (prior.high + prior.low + prior.close) / 3.0;
    let entry = 2.0 * pivot - prior.high;
    let target = 2.0 * pivot - prior.low;
    let stop = entry * STOP_BUFFER;

    let outputs = [change_pct, pivot, entry, target, stop];
    if outputs.iter().any(|v| !v.is_finite()) {
        return Err(SignalError::NonFinite);
    }

    Ok(Signal {
        symbol: symbol.clone(),
        session_date: last.session_date,
        price: last.close,
        change_pct,
        pivot,
        entry,
        target,
        stop,
    })
}

/// Like [`try_compute_signal`], but callers that skip unusable symbols only need the
/// presence of a signal.
pub fn compute_signal(symbol: &Symbol, bars: &[PriceBar]) -> Option<Signal> {
    try_compute_signal(symbol, bars).ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bar(day: u32, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            session_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            open: close,
            high,
            low,
            close,
        }
    }

    fn sym() -> Symbol {
        Symbol::parse("TEST").unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pivot_levels_from_prior_session() {
        let bars = [bar(2, 110.0, 100.0, 105.0), bar(3, 109.0, 104.0, 108.0)];
        let s = try_compute_signal(&sym(), &bars).unwrap();

        assert!(approx(s.pivot, 105.0));
        assert!(approx(s.target, 110.0));
        assert!(approx(s.entry, 100.0));
        assert!(approx(s.stop, 98.5));
        assert!(approx(s.price, 108.0));
        assert!(approx(s.change_pct, 3.0 / 105.0 * 100.0));
        assert!((s.change_pct - 2.857).abs() < 1e-3);
        assert_eq!(s.session_date, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    }

    #[test]
    fn uses_only_last_two_bars() {
        let bars = [
            bar(1, 500.0, 1.0, 250.0),
            bar(2, 110.0, 100.0, 105.0),
            bar(3, 109.0, 104.0, 108.0),
        ];
        let s = try_compute_signal(&sym(), &bars).unwrap();
        assert!(approx(s.pivot, 105.0));
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let bars = [bar(2, 123.4, 117.9, 120.1), bar(3, 125.0, 119.0, 121.7)];
        let a = try_compute_signal(&sym(), &bars).unwrap();
        let b = try_compute_signal(&sym(), &bars).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.change_pct.to_bits(), b.change_pct.to_bits());
    }

    #[test]
    fn fewer_than_two_bars_is_insufficient() {
        assert_eq!(
            try_compute_signal(&sym(), &[]),
            Err(SignalError::InsufficientData(0))
        );
        assert!(compute_signal(&sym(), &[bar(3, 1.0, 1.0, 1.0)]).is_none());
    }

    #[test]
    fn zero_prior_close_is_skipped() {
        let bars = [bar(2, 1.0, 0.0, 0.0), bar(3, 1.0, 0.5, 0.7)];
        assert_eq!(
            try_compute_signal(&sym(), &bars),
            Err(SignalError::ZeroPriorClose)
        );
    }

    #[test]
    fn nan_input_is_rejected() {
        let bars = [bar(2, f64::NAN, 100.0, 105.0), bar(3, 109.0, 104.0, 108.0)];
        assert_eq!(try_compute_signal(&sym(), &bars), Err(SignalError::NonFinite));
    }

    #[test]
    fn setup_flags_price_beyond_levels() {
        let bars = [bar(2, 110.0, 100.0, 105.0), bar(3, 112.0, 104.0, 111.0)];
        let s = try_compute_signal(&sym(), &bars).unwrap();
        assert_eq!(s.setup(), Setup::Overextended);
        assert!(s.upside_pct() < 0.0);

        let bars = [bar(2, 110.0, 100.0, 105.0), bar(3, 106.0, 95.0, 97.0)];
        assert_eq!(try_compute_signal(&sym(), &bars).unwrap().setup(), Setup::BelowStop);

        let bars = [bar(2, 110.0, 100.0, 105.0), bar(3, 109.0, 104.0, 108.0)];
        let s = try_compute_signal(&sym(), &bars).unwrap();
        assert_eq!(s.setup(), Setup::InRange);
        assert!(approx(s.upside_pct(), 2.0 / 108.0 * 100.0));
    }
}
