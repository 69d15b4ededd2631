use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::FolioError;
use crate::types::Ticker;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single closing price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Ascending price history for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: Ticker,
    pub points: Vec<PricePoint>,
}

/// Simple period returns derived from a [`PriceSeries`].
///
/// `dates[k]` is the date at the end of period `k`, so
/// `returns.len() == points.len() - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub ticker: Ticker,
    pub dates: Vec<NaiveDate>,
    pub returns: Vec<f64>,
}

/// Prices for a whole universe on a shared calendar.
///
/// `prices[i][t]` is ticker `i` on `dates[t]`; `None` where the ticker did
/// not print on that date.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPrices {
    pub tickers: Vec<Ticker>,
    pub dates: Vec<NaiveDate>,
    pub prices: Vec<Vec<Option<f64>>>,
}

// ---------------------------------------------------------------------------
// PriceSeries
// ---------------------------------------------------------------------------

impl PriceSeries {
    pub fn new(ticker: impl Into<Ticker>, points: Vec<PricePoint>) -> Self {
        Self {
            ticker: ticker.into(),
            points,
        }
    }

    /// Build from `(date, price)` pairs.
    pub fn from_pairs(ticker: impl Into<Ticker>, pairs: &[(NaiveDate, f64)]) -> Self {
        Self::new(
            ticker,
            pairs
                .iter()
                .map(|(date, price)| PricePoint {
                    date: *date,
                    price: *price,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Check positivity, ordering, uniqueness, and that every date lies in
    /// `[start, end]`.
    pub fn validate(&self, start: NaiveDate, end: NaiveDate) -> FolioResult<()> {
        let unavailable = |reason: String| FolioError::DataUnavailable {
            ticker: self.ticker.clone(),
            reason,
        };

        if self.points.is_empty() {
            return Err(unavailable("no price observations".into()));
        }

        for (k, p) in self.points.iter().enumerate() {
            if !p.price.is_finite() || p.price <= 0.0 {
                return Err(unavailable(format!(
                    "non-positive price {} on {}",
                    p.price, p.date
                )));
            }
            if p.date < start || p.date > end {
                return Err(unavailable(format!(
                    "observation {} outside requested range {}..={}",
                    p.date, start, end
                )));
            }
            if k > 0 {
                let prev = self.points[k - 1].date;
                if p.date == prev {
                    return Err(unavailable(format!("duplicate date {}", p.date)));
                }
                if p.date < prev {
                    return Err(unavailable(format!(
                        "dates not ascending: {} after {}",
                        p.date, prev
                    )));
                }
            }
        }
        Ok(())
    }

    /// Observations with `from <= date <= to`.
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> PriceSeries {
        PriceSeries {
            ticker: self.ticker.clone(),
            points: self
                .points
                .iter()
                .filter(|p| p.date >= from && p.date <= to)
                .copied()
                .collect(),
        }
    }

    pub fn returns(&self) -> ReturnSeries {
        let mut dates = Vec::with_capacity(self.points.len().saturating_sub(1));
        let mut returns = Vec::with_capacity(self.points.len().saturating_sub(1));
        for pair in self.points.windows(2) {
            dates.push(pair[1].date);
            returns.push(pair[1].price / pair[0].price - 1.0);
        }
        ReturnSeries {
            ticker: self.ticker.clone(),
            dates,
            returns,
        }
    }
}

// ---------------------------------------------------------------------------
// AlignedPrices
// ---------------------------------------------------------------------------

impl AlignedPrices {
    /// Align the universe onto the union of all observation dates.
    pub fn align(tickers: &[Ticker], series: &BTreeMap<Ticker, PriceSeries>) -> FolioResult<Self> {
        let mut calendar: BTreeSet<NaiveDate> = BTreeSet::new();
        for ticker in tickers {
            let s = series.get(ticker).ok_or_else(|| FolioError::DataUnavailable {
                ticker: ticker.clone(),
                reason: "no series supplied".into(),
            })?;
            calendar.extend(s.points.iter().map(|p| p.date));
        }
        let dates: Vec<NaiveDate> = calendar.into_iter().collect();

        let prices = tickers
            .iter()
            .map(|ticker| {
                let by_date: BTreeMap<NaiveDate, f64> = series[ticker]
                    .points
                    .iter()
                    .map(|p| (p.date, p.price))
                    .collect();
                dates.iter().map(|d| by_date.get(d).copied()).collect()
            })
            .collect();

        Ok(Self {
            tickers: tickers.to_vec(),
            dates,
            prices,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Restrict to `from <= date <= to`.
    pub fn window(&self, from: NaiveDate, to: NaiveDate) -> AlignedPrices {
        let keep: Vec<usize> = self
            .dates
            .iter()
            .enumerate()
            .filter(|(_, d)| **d >= from && **d <= to)
            .map(|(t, _)| t)
            .collect();
        AlignedPrices {
            tickers: self.tickers.clone(),
            dates: keep.iter().map(|&t| self.dates[t]).collect(),
            prices: self
                .prices
                .iter()
                .map(|row| keep.iter().map(|&t| row[t]).collect())
                .collect(),
        }
    }

    /// Fully populated price matrix, forward-filling gaps of at most
    /// `max_gap` consecutive missing observations. A leading gap is
    /// back-filled from the first print under the same limit.
    pub fn filled(&self, max_gap: usize) -> FolioResult<Vec<Vec<f64>>> {
        self.tickers
            .iter()
            .zip(self.prices.iter())
            .map(|(ticker, row)| fill_strict(ticker, row, max_gap))
            .collect()
    }

    /// Per-ticker period returns, `None` where a price is missing beyond
    /// `max_gap` forward-filled observations. Each row has `len() - 1`
    /// entries.
    pub fn sparse_returns(&self, max_gap: usize) -> Vec<Vec<Option<f64>>> {
        self.prices
            .iter()
            .map(|row| {
                let filled = fill_lenient(row, max_gap);
                filled
                    .windows(2)
                    .map(|pair| match (pair[0], pair[1]) {
                        (Some(a), Some(b)) if a > 0.0 => Some(b / a - 1.0),
                        _ => None,
                    })
                    .collect()
            })
            .collect()
    }
}

fn fill_strict(ticker: &str, row: &[Option<f64>], max_gap: usize) -> FolioResult<Vec<f64>> {
    let first = row.iter().position(|p| p.is_some()).ok_or_else(|| {
        FolioError::InsufficientHistory(format!("{} has no observations in the window", ticker))
    })?;
    if first > max_gap {
        return Err(FolioError::InsufficientHistory(format!(
            "{} starts {} observations into the window (fill tolerance {})",
            ticker, first, max_gap
        )));
    }

    let mut out = Vec::with_capacity(row.len());
    let mut last = row[first].unwrap_or_default();
    let mut run = 0usize;
    for price in row {
        match price {
            Some(p) => {
                last = *p;
                run = 0;
            }
            None => {
                run += 1;
                if out.len() >= first && run > max_gap {
                    return Err(FolioError::InsufficientHistory(format!(
                        "{} has a gap of more than {} observations",
                        ticker, max_gap
                    )));
                }
            }
        }
        out.push(last);
    }
    Ok(out)
}

fn fill_lenient(row: &[Option<f64>], max_gap: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(row.len());
    let mut last: Option<f64> = None;
    let mut run = 0usize;
    for price in row {
        match price {
            Some(p) => {
                last = Some(*p);
                run = 0;
                out.push(Some(*p));
            }
            None => {
                run += 1;
                out.push(if run <= max_gap { last } else { None });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_returns_length() {
        let s = PriceSeries::from_pairs(
            "A",
            &[(d(2024, 1, 2), 100.0), (d(2024, 1, 3), 110.0), (d(2024, 1, 4), 99.0)],
        );
        let r = s.returns();
        assert_eq!(r.returns.len(), s.len() - 1);
        assert!((r.returns[0] - 0.10).abs() < 1e-12);
        assert!((r.returns[1] + 0.10).abs() < 1e-12);
        assert_eq!(r.dates[0], d(2024, 1, 3));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_prices() {
        let start = d(2024, 1, 1);
        let end = d(2024, 12, 31);
        let dup = PriceSeries::from_pairs("A", &[(d(2024, 1, 2), 1.0), (d(2024, 1, 2), 1.0)]);
        assert!(dup.validate(start, end).is_err());
        let neg = PriceSeries::from_pairs("A", &[(d(2024, 1, 2), 1.0), (d(2024, 1, 3), -1.0)]);
        assert!(neg.validate(start, end).is_err());
        let outside = PriceSeries::from_pairs("A", &[(d(2023, 12, 29), 1.0)]);
        assert!(outside.validate(start, end).is_err());
        let ok = PriceSeries::from_pairs("A", &[(d(2024, 1, 2), 1.0), (d(2024, 1, 3), 1.1)]);
        assert!(ok.validate(start, end).is_ok());
    }

    #[test]
    fn test_align_and_fill() {
        let mut map = BTreeMap::new();
        map.insert(
            "A".to_string(),
            PriceSeries::from_pairs(
                "A",
                &[(d(2024, 1, 2), 10.0), (d(2024, 1, 3), 11.0), (d(2024, 1, 4), 12.0)],
            ),
        );
        map.insert(
            "B".to_string(),
            PriceSeries::from_pairs("B", &[(d(2024, 1, 2), 20.0), (d(2024, 1, 4), 22.0)]),
        );
        let aligned = AlignedPrices::align(&["A".into(), "B".into()], &map).unwrap();
        assert_eq!(aligned.len(), 3);
        assert_eq!(aligned.prices[1][1], None);

        let filled = aligned.filled(1).unwrap();
        assert_eq!(filled[1], vec![20.0, 20.0, 22.0]);
        assert!(aligned.filled(0).is_err());

        let sparse = aligned.sparse_returns(0);
        assert_eq!(sparse[1], vec![None, None]);
        let sparse = aligned.sparse_returns(1);
        assert_eq!(sparse[1][0], Some(0.0));
    }

    #[test]
    fn test_leading_gap_backfilled() {
        let row = vec![None, Some(5.0), Some(6.0)];
        assert_eq!(fill_strict("X", &row, 1).unwrap(), vec![5.0, 5.0, 6.0]);
        assert!(fill_strict("X", &row, 0).is_err());
        assert!(fill_strict("X", &[None, None], 5).is_err());
    }
}
