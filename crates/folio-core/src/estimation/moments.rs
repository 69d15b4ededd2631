use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::FolioError;
use crate::linalg::{condition_number, to_matrix};
use crate::market_data::{AlignedPrices, PriceSeries};
use crate::types::{with_metadata, ComputationOutput, ReturnFrequency, Ticker};
use crate::FolioResult;

/// Shrinkage intensities tried in order until the covariance is well
/// conditioned.
const SHRINKAGE_LADDER: [f64; 6] = [0.05, 0.10, 0.20, 0.40, 0.70, 1.0];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Estimation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentSettings {
    /// Observation frequency; drives annualisation.
    pub frequency: ReturnFrequency,
    /// Minimum number of period returns required.
    pub min_observations: usize,
    /// Longest run of missing observations that may be forward-filled.
    pub max_fill_gap: usize,
    /// Condition number above which shrinkage is applied.
    pub condition_threshold: f64,
}

impl Default for MomentSettings {
    fn default() -> Self {
        Self {
            frequency: ReturnFrequency::Daily,
            min_observations: 30,
            max_fill_gap: 5,
            condition_threshold: 1e8,
        }
    }
}

/// Annualised first and second moments for a universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentEstimate {
    /// Universe order; every vector and matrix below is indexed by it.
    pub tickers: Vec<Ticker>,
    /// Annualised mean simple returns.
    pub expected_returns: Vec<f64>,
    /// Annualised covariance after any regularisation.
    pub covariance: Vec<Vec<f64>>,
    /// Number of period returns used.
    pub observations: usize,
    pub periods_per_year: f64,
    /// Shrinkage intensity toward the diagonal (0 when untouched).
    pub shrinkage: f64,
    /// Ridge added to the diagonal after shrinkage (0 when untouched).
    pub ridge: f64,
    /// Condition number of the returned covariance.
    pub condition_number: f64,
}

impl MomentEstimate {
    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        (0..self.n_assets())
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
            .collect()
    }

    pub fn is_regularized(&self) -> bool {
        self.shrinkage > 0.0 || self.ridge > 0.0
    }
}

/// Result of conditioning a covariance matrix.
#[derive(Debug, Clone)]
pub struct Regularized {
    pub covariance: Vec<Vec<f64>>,
    pub shrinkage: f64,
    pub ridge: f64,
    pub condition_number: f64,
}

/// Input for the standalone moments computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentInput {
    pub series: Vec<PriceSeries>,
    #[serde(default)]
    pub settings: MomentSettings,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// Sample mean and covariance of simple returns.
#[derive(Debug, Clone, Default)]
pub struct MomentEstimator {
    settings: MomentSettings,
}

impl MomentEstimator {
    pub fn new(settings: MomentSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MomentSettings {
        &self.settings
    }

    /// Estimate from aligned prices, forward-filling short gaps.
    pub fn estimate(&self, prices: &AlignedPrices) -> FolioResult<MomentEstimate> {
        let filled = prices.filled(self.settings.max_fill_gap)?;
        let returns: Vec<Vec<f64>> = filled
            .iter()
            .map(|row| row.windows(2).map(|p| p[1] / p[0] - 1.0).collect())
            .collect();
        self.estimate_from_returns(&prices.tickers, &returns)
    }

    /// Estimate from equal-length per-ticker return rows.
    pub fn estimate_from_returns(
        &self,
        tickers: &[Ticker],
        returns: &[Vec<f64>],
    ) -> FolioResult<MomentEstimate> {
        let n = tickers.len();
        if returns.len() != n {
            return Err(FolioError::invalid(
                "returns",
                format!("expected {} return rows, got {}", n, returns.len()),
            ));
        }
        let t = returns.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = returns.iter().enumerate().find(|(_, r)| r.len() != t) {
            return Err(FolioError::invalid(
                "returns",
                format!("{} has {} returns, expected {}", tickers[i], row.len(), t),
            ));
        }
        if t < self.settings.min_observations.max(2) {
            return Err(FolioError::InsufficientHistory(format!(
                "{} return observations, at least {} required",
                t,
                self.settings.min_observations.max(2)
            )));
        }

        let ppy = self.settings.frequency.periods_per_year();
        let means: Vec<f64> = returns.iter().map(|r| mean(r)).collect();

        let mut cov = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let c = sample_covariance(&returns[i], &returns[j], means[i], means[j]) * ppy;
                cov[i][j] = c;
                cov[j][i] = c;
            }
        }

        let reg = regularize(&cov, self.settings.condition_threshold);
        if reg.shrinkage > 0.0 || reg.ridge > 0.0 {
            warn!(
                shrinkage = reg.shrinkage,
                ridge = reg.ridge,
                "covariance ill-conditioned, regularized"
            );
        }
        debug!(n, observations = t, cond = reg.condition_number, "moments estimated");

        Ok(MomentEstimate {
            tickers: tickers.to_vec(),
            expected_returns: means.iter().map(|m| m * ppy).collect(),
            covariance: reg.covariance,
            observations: t,
            periods_per_year: ppy,
            shrinkage: reg.shrinkage,
            ridge: reg.ridge,
            condition_number: reg.condition_number,
        })
    }
}

/// Estimate moments from raw price series, wrapped in the standard envelope.
pub fn estimate_moments(input: &MomentInput) -> FolioResult<ComputationOutput<MomentEstimate>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let tickers: Vec<Ticker> = input.series.iter().map(|s| s.ticker.clone()).collect();
    let map: BTreeMap<Ticker, PriceSeries> = input
        .series
        .iter()
        .map(|s| (s.ticker.clone(), s.clone()))
        .collect();
    if map.len() != tickers.len() {
        return Err(FolioError::InvalidUniverse("duplicate ticker in series".into()));
    }
    for s in &input.series {
        if let (Some(first), Some(last)) = (s.first_date(), s.last_date()) {
            s.validate(first, last)?;
        } else {
            s.validate(chrono::NaiveDate::MIN, chrono::NaiveDate::MAX)?;
        }
    }

    let aligned = AlignedPrices::align(&tickers, &map)?;
    let estimate = MomentEstimator::new(input.settings.clone()).estimate(&aligned)?;
    if estimate.is_regularized() {
        warnings.push(format!(
            "Covariance regularized: shrinkage {:.2}, ridge {:.3e}",
            estimate.shrinkage, estimate.ridge
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sample moments of simple returns (Bessel-corrected, annualised)",
        &serde_json::json!({
            "n_assets": tickers.len(),
            "frequency": input.settings.frequency,
            "max_fill_gap": input.settings.max_fill_gap,
            "condition_threshold": input.settings.condition_threshold,
        }),
        warnings,
        elapsed,
        estimate,
    ))
}

// ---------------------------------------------------------------------------
// Regularisation
// ---------------------------------------------------------------------------

/// `(1 - gamma) * cov + gamma * diag(cov)`.
pub fn shrink(cov: &[Vec<f64>], gamma: f64) -> Vec<Vec<f64>> {
    let n = cov.len();
    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            out[i][j] = if i == j {
                cov[i][i]
            } else {
                (1.0 - gamma) * cov[i][j]
            };
        }
    }
    out
}

/// Shrink toward the diagonal until the condition number is at most
/// `threshold`, then add a ridge if the diagonal itself is degenerate.
pub fn regularize(cov: &[Vec<f64>], threshold: f64) -> Regularized {
    let n = cov.len();
    let cond = condition_number(&to_matrix(cov));
    if cond <= threshold {
        return Regularized {
            covariance: cov.to_vec(),
            shrinkage: 0.0,
            ridge: 0.0,
            condition_number: cond,
        };
    }

    let mut shrunk = cov.to_vec();
    let mut gamma = 0.0;
    for g in SHRINKAGE_LADDER {
        shrunk = shrink(cov, g);
        gamma = g;
        let c = condition_number(&to_matrix(&shrunk));
        if c <= threshold {
            return Regularized {
                covariance: shrunk,
                shrinkage: gamma,
                ridge: 0.0,
                condition_number: c,
            };
        }
    }

    let trace: f64 = (0..n).map(|i| shrunk[i][i].max(0.0)).sum();
    let base = if n > 0 { (trace / n as f64).max(1e-8) } else { 1e-8 };
    let mut ridge = base * 1e-6;
    let mut last = shrunk.clone();
    let mut c = f64::INFINITY;
    for _ in 0..16 {
        last = shrunk.clone();
        for (i, row) in last.iter_mut().enumerate() {
            row[i] = row[i].max(0.0) + ridge;
        }
        c = condition_number(&to_matrix(&last));
        if c <= threshold {
            break;
        }
        ridge *= 10.0;
    }

    Regularized {
        covariance: last,
        shrinkage: gamma,
        ridge,
        condition_number: c,
    }
}

// ---------------------------------------------------------------------------
// Statistics helpers
// ---------------------------------------------------------------------------

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Sample covariance (n-1 denominator).
pub(crate) fn sample_covariance(x: &[f64], y: &[f64], mx: f64, my: f64) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let sum: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(xi, yi)| (xi - mx) * (yi - my))
        .sum();
    sum / (n - 1) as f64
}
