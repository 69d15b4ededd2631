use folio_core::analysis::{AnalysisEngine, AnalysisRequest, EngineConfig};
use folio_core::market_data::{InMemoryPriceProvider, PriceSeries};
use folio_core::prediction::{ReturnPredictor, StaticPredictor, TrendPredictor};
use napi::Result as NapiResult;
use napi_derive::napi;
use serde::Deserialize;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

/// Everything a JavaScript caller supplies for one analysis.
#[derive(Deserialize)]
struct AnalysisPayload {
    request: AnalysisRequest,
    prices: Vec<PriceSeries>,
    /// Precomputed model views; a log-price trend model is used when absent.
    #[serde(default)]
    predictions: Option<StaticPredictor>,
    #[serde(default)]
    config: Option<EngineConfig>,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[napi]
pub fn run_analysis(input_json: String) -> NapiResult<String> {
    let payload: AnalysisPayload = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let config = payload.config.unwrap_or_default();
    let provider: InMemoryPriceProvider = payload.prices.into_iter().collect();
    let predictor: Box<dyn ReturnPredictor> = match payload.predictions {
        Some(p) => Box::new(p),
        None => Box::new(TrendPredictor::new(config.frequency)),
    };

    let engine = AnalysisEngine::new(&provider, predictor.as_ref(), config);
    let output = engine.run(&payload.request).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

#[napi]
pub fn estimate_moments(input_json: String) -> NapiResult<String> {
    let input: folio_core::estimation::MomentInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = folio_core::estimation::estimate_moments(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn project_weights(input_json: String) -> NapiResult<String> {
    let input: folio_core::optimization::ProjectionInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = folio_core::optimization::project_weights(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn performance_metrics(input_json: String) -> NapiResult<String> {
    let input: folio_core::backtest::MetricsInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        folio_core::backtest::calculate_performance_metrics(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
