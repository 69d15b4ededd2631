use clap::Args;
use folio_core::analysis::{AnalysisEngine, AnalysisRequest, EngineConfig};
use folio_core::prediction::{ReturnPredictor, StaticPredictor, TrendPredictor};
use serde_json::Value;

use crate::input;
use crate::input::prices::CsvPriceProvider;

/// Arguments for the full analysis
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to the analysis request JSON (otherwise read from stdin)
    #[arg(long)]
    pub input: Option<String>,

    /// Long-format price CSV with columns date,ticker,price
    #[arg(long)]
    pub prices: String,

    /// Precomputed model predictions (JSON); a log-price trend model is used
    /// when omitted
    #[arg(long)]
    pub predictions: Option<String>,
}

pub fn run_analyze(args: AnalyzeArgs, config: EngineConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let request: AnalysisRequest = input::stdin::read_input(args.input.as_deref(), "analysis request")?;
    let provider = CsvPriceProvider::from_path(&args.prices)?;

    let predictor: Box<dyn ReturnPredictor> = match args.predictions {
        Some(ref path) => Box::new(input::file::read_json::<StaticPredictor>(path)?),
        None => Box::new(TrendPredictor::new(config.frequency)),
    };

    let engine = AnalysisEngine::new(&provider, predictor.as_ref(), config);
    let output = engine.run(&request)?;
    Ok(serde_json::to_value(output)?)
}
