use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::FolioError;
use crate::market_data::PriceSeries;
use crate::types::{ReturnFrequency, Ticker};
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Model family requested by the caller. The engine never branches on it;
/// it is handed to the [`ReturnPredictor`] as a tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Xgboost,
    RandomForest,
    GradientBoosting,
    LinearRegression,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelKind::Xgboost => "xgboost",
            ModelKind::RandomForest => "random_forest",
            ModelKind::GradientBoosting => "gradient_boosting",
            ModelKind::LinearRegression => "linear_regression",
        };
        f.write_str(s)
    }
}

/// One absolute view on a ticker's annual return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedView {
    pub ticker: Ticker,
    /// Expected annual simple return as a fraction.
    pub expected_return: f64,
    /// Model confidence in [0, 1]; 0 means the view carries no information.
    pub confidence: f64,
}

impl PredictedView {
    pub fn new(ticker: impl Into<Ticker>, expected_return: f64, confidence: f64) -> Self {
        Self {
            ticker: ticker.into(),
            expected_return,
            confidence,
        }
    }

    pub fn validate(&self) -> FolioResult<()> {
        if !self.expected_return.is_finite() {
            return Err(FolioError::invalid(
                format!("predictions.{}", self.ticker),
                "expected return is not finite",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(FolioError::invalid(
                format!("predictions.{}", self.ticker),
                format!("confidence {} outside [0, 1]", self.confidence),
            ));
        }
        Ok(())
    }
}

/// Return-prediction collaborator. Training and inference live outside the
/// engine; every model family is consumed through this one call.
pub trait ReturnPredictor: Send + Sync {
    fn predict(
        &self,
        ticker: &str,
        history: &PriceSeries,
        model: ModelKind,
    ) -> FolioResult<PredictedView>;
}

/// Run the predictor over a universe and validate every view.
pub fn predict_universe(
    predictor: &dyn ReturnPredictor,
    tickers: &[Ticker],
    histories: &BTreeMap<Ticker, PriceSeries>,
    model: ModelKind,
) -> FolioResult<Vec<PredictedView>> {
    tickers
        .iter()
        .map(|ticker| {
            let history = histories
                .get(ticker)
                .ok_or_else(|| FolioError::DataUnavailable {
                    ticker: ticker.clone(),
                    reason: "no history for prediction".into(),
                })?;
            let view = predictor.predict(ticker, history, model)?;
            view.validate()?;
            debug!(
                ticker = %ticker,
                model = %model,
                expected_return = view.expected_return,
                confidence = view.confidence,
                "view predicted"
            );
            Ok(view)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// StaticPredictor
// ---------------------------------------------------------------------------

/// Predictions computed elsewhere (for instance exported by a model
/// service), optionally keyed per model family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPredictor {
    /// Views used for any model without a dedicated entry.
    #[serde(default)]
    pub views: BTreeMap<Ticker, PredictedView>,
    #[serde(default)]
    pub by_model: BTreeMap<ModelKind, BTreeMap<Ticker, PredictedView>>,
}

impl StaticPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(mut self, view: PredictedView) -> Self {
        self.views.insert(view.ticker.clone(), view);
        self
    }

    pub fn with_model_view(mut self, model: ModelKind, view: PredictedView) -> Self {
        self.by_model
            .entry(model)
            .or_default()
            .insert(view.ticker.clone(), view);
        self
    }
}

impl ReturnPredictor for StaticPredictor {
    fn predict(
        &self,
        ticker: &str,
        _history: &PriceSeries,
        model: ModelKind,
    ) -> FolioResult<PredictedView> {
        self.by_model
            .get(&model)
            .and_then(|m| m.get(ticker))
            .or_else(|| self.views.get(ticker))
            .cloned()
            .ok_or_else(|| FolioError::DataUnavailable {
                ticker: ticker.to_string(),
                reason: format!("no {} prediction supplied", model),
            })
    }
}

// ---------------------------------------------------------------------------
// TrendPredictor
// ---------------------------------------------------------------------------

/// Log-linear trend fit: regress ln(price) on the observation index and
/// annualise the slope. Confidence is the fit's R².
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendPredictor {
    pub frequency: ReturnFrequency,
}

impl TrendPredictor {
    pub fn new(frequency: ReturnFrequency) -> Self {
        Self { frequency }
    }
}

impl ReturnPredictor for TrendPredictor {
    fn predict(
        &self,
        ticker: &str,
        history: &PriceSeries,
        _model: ModelKind,
    ) -> FolioResult<PredictedView> {
        let n = history.len();
        if n < 3 {
            return Err(FolioError::InsufficientHistory(format!(
                "{} has {} prices, trend fit needs at least 3",
                ticker, n
            )));
        }
        let ys: Vec<f64> = history.points.iter().map(|p| p.price.ln()).collect();
        if ys.iter().any(|y| !y.is_finite()) {
            return Err(FolioError::DataUnavailable {
                ticker: ticker.to_string(),
                reason: "non-positive price in history".into(),
            });
        }

        let nf = n as f64;
        let x_mean = (nf - 1.0) / 2.0;
        let y_mean = ys.iter().sum::<f64>() / nf;
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        for (k, y) in ys.iter().enumerate() {
            let dx = k as f64 - x_mean;
            sxy += dx * (y - y_mean);
            sxx += dx * dx;
        }
        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;

        let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();
        let ss_res: f64 = ys
            .iter()
            .enumerate()
            .map(|(k, y)| (y - intercept - slope * k as f64).powi(2))
            .sum();
        let r_squared = if ss_tot > 1e-18 {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let drift = slope * self.frequency.periods_per_year();
        Ok(PredictedView::new(ticker, drift.exp() - 1.0, r_squared))
    }
}
