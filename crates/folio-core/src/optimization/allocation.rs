use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Ticker;

/// Allocation strategies compared by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BlackLitterman,
    Mvo,
    EqualWeight,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::BlackLitterman, Strategy::Mvo, Strategy::EqualWeight];

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::BlackLitterman => "black_litterman",
            Strategy::Mvo => "mvo",
            Strategy::EqualWeight => "equal_weight",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Weights produced by one strategy, aligned to `tickers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub strategy: Strategy,
    pub tickers: Vec<Ticker>,
    pub weights: Vec<f64>,
    /// Ex-ante annual return under the moments the strategy optimized with.
    pub expected_return: Option<f64>,
    /// Ex-ante annual volatility under the sample covariance.
    pub expected_volatility: Option<f64>,
    /// Volatility target missed beyond tolerance.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

impl Allocation {
    pub fn weight_of(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.weights[i])
    }

    pub fn weight_map(&self) -> BTreeMap<Ticker, f64> {
        self.tickers
            .iter()
            .cloned()
            .zip(self.weights.iter().copied())
            .collect()
    }

    /// Sum of weights is one within `1e-6`.
    pub fn is_fully_invested(&self) -> bool {
        (self.weights.iter().sum::<f64>() - 1.0).abs() <= 1e-6
    }
}

/// Herfindahl-Hirschman concentration of a weight vector.
pub fn hhi(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}

/// Warnings shared by the optimizing strategies.
pub(crate) fn concentration_warnings(tickers: &[Ticker], weights: &[f64], cap: f64) -> Vec<String> {
    let mut warnings: Vec<String> = tickers
        .iter()
        .zip(weights.iter())
        .filter(|(_, w)| **w > cap)
        .map(|(t, w)| format!("Concentrated position: {} has weight {:.4}", t, w))
        .collect();
    let h = hhi(weights);
    if h > 0.5 {
        warnings.push(format!("High concentration: HHI = {:.4}", h));
    }
    warnings
}
