use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::series::PriceSeries;
use crate::error::FolioError;
use crate::types::Ticker;
use crate::FolioResult;

/// Source of historical prices.
///
/// Implementations return one ascending series per requested ticker,
/// restricted to `[start, end]`, and fail with
/// [`FolioError::DataUnavailable`] for unknown or delisted symbols.
pub trait PriceHistoryProvider: Send + Sync {
    fn fetch(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> FolioResult<BTreeMap<Ticker, PriceSeries>>;
}

/// Provider backed by series already held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceProvider {
    series: BTreeMap<Ticker, PriceSeries>,
}

impl InMemoryPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.insert(series);
        self
    }

    /// Insert a series, sorting its points by date.
    pub fn insert(&mut self, mut series: PriceSeries) {
        series.points.sort_by_key(|p| p.date);
        self.series.insert(series.ticker.clone(), series);
    }

    pub fn tickers(&self) -> impl Iterator<Item = &Ticker> {
        self.series.keys()
    }
}

impl FromIterator<PriceSeries> for InMemoryPriceProvider {
    fn from_iter<I: IntoIterator<Item = PriceSeries>>(iter: I) -> Self {
        let mut provider = Self::new();
        for s in iter {
            provider.insert(s);
        }
        provider
    }
}

impl PriceHistoryProvider for InMemoryPriceProvider {
    fn fetch(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> FolioResult<BTreeMap<Ticker, PriceSeries>> {
        let mut out = BTreeMap::new();
        for ticker in tickers {
            let series = self
                .series
                .get(ticker)
                .ok_or_else(|| FolioError::DataUnavailable {
                    ticker: ticker.clone(),
                    reason: "unknown ticker".into(),
                })?;
            let window = series.between(start, end);
            if window.is_empty() {
                return Err(FolioError::DataUnavailable {
                    ticker: ticker.clone(),
                    reason: format!("no prices between {} and {}", start, end),
                });
            }
            out.insert(ticker.clone(), window);
        }
        Ok(out)
    }
}
