use chrono::NaiveDate;
use folio_core::market_data::{InMemoryPriceProvider, PriceHistoryProvider, PricePoint, PriceSeries};
use folio_core::types::Ticker;
use folio_core::FolioResult;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

use super::file::resolve_path;

/// One row of a long-format price file: `date,ticker,price`.
#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    ticker: Ticker,
    price: f64,
}

/// Price histories loaded from a long-format CSV file.
#[derive(Debug, Clone, Default)]
pub struct CsvPriceProvider {
    inner: InMemoryPriceProvider,
}

impl CsvPriceProvider {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let canonical = resolve_path(path)?;
        let file = std::fs::File::open(&canonical)
            .map_err(|e| format!("Failed to open '{}': {}", canonical.display(), e))?;
        Self::from_reader(file)
            .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e).into())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut points: BTreeMap<Ticker, Vec<PricePoint>> = BTreeMap::new();
        for (line, row) in rdr.deserialize::<PriceRow>().enumerate() {
            let row = row.map_err(|e| format!("row {}: {}", line + 2, e))?;
            points.entry(row.ticker).or_default().push(PricePoint {
                date: row.date,
                price: row.price,
            });
        }
        let inner = points
            .into_iter()
            .map(|(ticker, pts)| PriceSeries::new(ticker, pts))
            .collect();
        Ok(Self { inner })
    }

    pub fn tickers(&self) -> Vec<Ticker> {
        self.inner.tickers().cloned().collect()
    }
}

impl PriceHistoryProvider for CsvPriceProvider {
    fn fetch(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> FolioResult<BTreeMap<Ticker, PriceSeries>> {
        self.inner.fetch(tickers, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "date,ticker,price
2024-01-03,MSFT,370.6
2024-01-02,AAPL,185.6
2024-01-02,MSFT,370.9
2024-01-03,AAPL,184.3
";

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_long_format_grouped_and_sorted() {
        let provider = CsvPriceProvider::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(provider.tickers(), vec!["AAPL".to_string(), "MSFT".to_string()]);

        let fetched = provider
            .fetch(&["MSFT".to_string()], d(1), d(31))
            .unwrap();
        let msft = &fetched["MSFT"];
        assert_eq!(msft.points[0].date, d(2));
        assert_eq!(msft.points[1].price, 370.6);
    }

    #[test]
    fn test_bad_row_reports_line() {
        let err = CsvPriceProvider::from_reader("date,ticker,price\n2024-01-02,AAPL,abc\n".as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_unknown_ticker_unavailable() {
        let provider = CsvPriceProvider::from_reader(SAMPLE.as_bytes()).unwrap();
        assert!(provider.fetch(&["TSLA".to_string()], d(1), d(31)).is_err());
    }
}
