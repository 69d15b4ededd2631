use chrono::NaiveDate;
use clap::Args;
use folio_core::analysis::EngineConfig;
use folio_core::estimation::{self, MomentInput};
use folio_core::market_data::PriceHistoryProvider;
use serde_json::Value;

use crate::input::prices::CsvPriceProvider;

/// Arguments for moment estimation
#[derive(Args)]
pub struct MomentsArgs {
    /// Long-format price CSV with columns date,ticker,price
    #[arg(long)]
    pub prices: String,

    /// Comma-separated tickers (default: every ticker in the file)
    #[arg(long, value_delimiter = ',')]
    pub tickers: Option<Vec<String>>,

    /// First date to include (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last date to include (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

pub fn run_moments(args: MomentsArgs, config: &EngineConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let provider = CsvPriceProvider::from_path(&args.prices)?;
    let tickers = args.tickers.unwrap_or_else(|| provider.tickers());
    let start = args.start.unwrap_or(NaiveDate::MIN);
    let end = args.end.unwrap_or(NaiveDate::MAX);

    let fetched = provider.fetch(&tickers, start, end)?;
    let series = tickers
        .iter()
        .filter_map(|t| fetched.get(t).cloned())
        .collect();

    let output = estimation::estimate_moments(&MomentInput {
        series,
        settings: config.moment_settings(),
    })?;
    Ok(serde_json::to_value(output)?)
}
