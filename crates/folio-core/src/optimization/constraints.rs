use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::FolioError;
use crate::linalg::quad_form;
use crate::types::{fraction_to_pct, pct_to_fraction, with_metadata, ComputationOutput, Ticker};
use crate::FolioResult;

/// Tolerance on `min * n` / `max * n` against 1 when checking feasibility.
const FEASIBILITY_EPS: f64 = 1e-9;
/// Residual below which water-filling stops.
const BUDGET_EPS: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-asset weight bounds shared by every asset in the universe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl WeightBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Bounds from percentages (10 = 10%).
    pub fn from_pct(min_pct: Decimal, max_pct: Decimal) -> Self {
        Self::new(pct_to_fraction(min_pct), pct_to_fraction(max_pct))
    }

    /// Check the bounds on their own and against a universe of `n` assets.
    pub fn validate(&self, n: usize) -> FolioResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(FolioError::ConstraintInfeasible(
                "weight bounds must be finite".into(),
            ));
        }
        if self.min < 0.0 || self.max > 1.0 {
            return Err(FolioError::ConstraintInfeasible(format!(
                "bounds [{}, {}] outside [0, 1]",
                self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(FolioError::ConstraintInfeasible(format!(
                "min weight {} exceeds max weight {}",
                self.min, self.max
            )));
        }
        if n == 0 {
            return Err(FolioError::InvalidUniverse("empty universe".into()));
        }
        let nf = n as f64;
        if self.min * nf > 1.0 + FEASIBILITY_EPS {
            return Err(FolioError::ConstraintInfeasible(format!(
                "min weight {} across {} assets exceeds 100%",
                self.min, n
            )));
        }
        if self.max * nf < 1.0 - FEASIBILITY_EPS {
            return Err(FolioError::ConstraintInfeasible(format!(
                "max weight {} across {} assets cannot reach 100%",
                self.max, n
            )));
        }
        Ok(())
    }

    /// The feasible set is a single point when either bound is binding for
    /// every asset.
    fn pinned(&self, n: usize) -> Option<f64> {
        let nf = n as f64;
        if (self.min * nf - 1.0).abs() <= FEASIBILITY_EPS {
            Some(self.min)
        } else if (self.max * nf - 1.0).abs() <= FEASIBILITY_EPS {
            Some(self.max)
        } else {
            None
        }
    }
}

/// A feasible allocation plus volatility diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub weights: Vec<f64>,
    /// Ex-ante annual volatility, when a covariance was supplied.
    pub volatility: Option<f64>,
    /// Set when the volatility target could not be met within tolerance.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

/// Enforces bounds, budget, and the volatility target on raw weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProjector {
    pub bounds: WeightBounds,
    pub target_volatility: Option<f64>,
    pub volatility_tolerance: f64,
}

impl ConstraintProjector {
    pub fn new(bounds: WeightBounds) -> Self {
        Self {
            bounds,
            target_volatility: None,
            volatility_tolerance: 0.02,
        }
    }

    pub fn with_target_volatility(mut self, target: f64, tolerance: f64) -> Self {
        self.target_volatility = Some(target);
        self.volatility_tolerance = tolerance;
        self
    }

    /// Turn `raw` into a normalized vector inside the bounds.
    ///
    /// Non-finite and negative entries count as zero. The clipped vector is
    /// water-filled: the budget residual is spread over entries not yet at
    /// the binding bound in proportion to their weight, then re-clipped.
    pub fn project(&self, raw: &[f64], cov: Option<&[Vec<f64>]>) -> FolioResult<Projection> {
        let n = raw.len();
        self.bounds.validate(n)?;
        let WeightBounds { min: lo, max: hi } = self.bounds;

        let weights = match self.bounds.pinned(n) {
            Some(level) => vec![level; n],
            None => water_fill(raw, lo, hi)?,
        };

        let mut warnings = Vec::new();
        let mut degraded = false;
        let volatility = cov.map(|c| quad_form(&weights, c).max(0.0).sqrt());

        if let (Some(target), Some(vol)) = (self.target_volatility, volatility) {
            if (vol - target).abs() > self.volatility_tolerance {
                degraded = true;
                warn!(target, achieved = vol, "volatility target missed");
                warnings.push(format!(
                    "Target volatility {:.2}% not met within bounds; achieved {:.2}%",
                    target * 100.0,
                    vol * 100.0
                ));
            }
        }

        Ok(Projection {
            weights,
            volatility,
            degraded,
            warnings,
        })
    }
}

/// Input for the standalone projection computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionInput {
    pub tickers: Vec<Ticker>,
    /// Raw weights aligned to `tickers`; any scale.
    pub weights: Vec<f64>,
    pub min_weight_pct: Decimal,
    pub max_weight_pct: Decimal,
    pub target_volatility_pct: Option<Decimal>,
    /// Volatility tolerance as a fraction (default 0.02).
    pub volatility_tolerance: Option<f64>,
    /// Annualised covariance aligned to `tickers`.
    pub covariance: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerWeight {
    pub ticker: Ticker,
    pub weight_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionOutput {
    pub weights: Vec<TickerWeight>,
    pub volatility_pct: Option<Decimal>,
    pub degraded: bool,
}

/// Project raw weights onto the bounds, wrapped in the standard envelope.
pub fn project_weights(input: &ProjectionInput) -> FolioResult<ComputationOutput<ProjectionOutput>> {
    let start = Instant::now();
    if input.weights.len() != input.tickers.len() {
        return Err(FolioError::invalid(
            "weights",
            format!(
                "Expected {} weights but got {}",
                input.tickers.len(),
                input.weights.len()
            ),
        ));
    }

    let mut projector =
        ConstraintProjector::new(WeightBounds::from_pct(input.min_weight_pct, input.max_weight_pct));
    if let Some(target) = input.target_volatility_pct {
        projector = projector.with_target_volatility(
            pct_to_fraction(target),
            input.volatility_tolerance.unwrap_or(0.02),
        );
    }
    let projection = projector.project(&input.weights, input.covariance.as_deref())?;

    let output = ProjectionOutput {
        weights: input
            .tickers
            .iter()
            .zip(projection.weights.iter())
            .map(|(t, w)| TickerWeight {
                ticker: t.clone(),
                weight_pct: fraction_to_pct(*w, 4),
            })
            .collect(),
        volatility_pct: projection.volatility.map(|v| fraction_to_pct(v, 4)),
        degraded: projection.degraded,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Bounded water-fill projection onto the fully invested simplex",
        &serde_json::json!({
            "n_assets": input.tickers.len(),
            "min_weight_pct": input.min_weight_pct.to_string(),
            "max_weight_pct": input.max_weight_pct.to_string(),
            "volatility_tolerance": projector.volatility_tolerance,
        }),
        projection.warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Projection routines
// ---------------------------------------------------------------------------

fn water_fill(raw: &[f64], lo: f64, hi: f64) -> FolioResult<Vec<f64>> {
    let n = raw.len();
    let mut w: Vec<f64> = raw
        .iter()
        .map(|x| if x.is_finite() && *x > 0.0 { *x } else { 0.0 })
        .collect();

    let total: f64 = w.iter().sum();
    if total <= 0.0 {
        w = vec![1.0 / n as f64; n];
    } else {
        w.iter_mut().for_each(|x| *x /= total);
    }
    w.iter_mut().for_each(|x| *x = x.clamp(lo, hi));

    let mut rounds = 0;
    loop {
        let residual = 1.0 - w.iter().sum::<f64>();
        if residual.abs() <= BUDGET_EPS {
            break;
        }
        if rounds > 2 * n + 2 {
            return Err(FolioError::ConstraintInfeasible(format!(
                "budget residual {:.3e} after {} rounds",
                residual, rounds
            )));
        }
        rounds += 1;

        let free: Vec<usize> = (0..n)
            .filter(|&i| {
                if residual > 0.0 {
                    w[i] < hi
                } else {
                    w[i] > lo
                }
            })
            .collect();
        if free.is_empty() {
            return Err(FolioError::ConstraintInfeasible(
                "every weight is at its bound".into(),
            ));
        }

        let base: f64 = free.iter().map(|&i| w[i]).sum();
        for &i in &free {
            let share = if base > 0.0 {
                w[i] / base
            } else {
                1.0 / free.len() as f64
            };
            w[i] = (w[i] + residual * share).clamp(lo, hi);
        }
    }
    debug!(rounds, "water-fill converged");
    Ok(w)
}

/// `w_i = clamp(v_i - lambda, lo, hi)` with `lambda` found by bisection so
/// the weights sum to one.
pub fn project_capped_simplex(v: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let sum_at = |lambda: f64| -> f64 { v.iter().map(|x| (x - lambda).clamp(lo, hi)).sum() };

    let v_min = v.iter().copied().fold(f64::INFINITY, f64::min);
    let v_max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    // sum_at(a) = n * hi >= 1 and sum_at(b) = n * lo <= 1
    let mut a = v_min - hi;
    let mut b = v_max - lo;
    for _ in 0..200 {
        let mid = 0.5 * (a + b);
        if sum_at(mid) > 1.0 {
            a = mid;
        } else {
            b = mid;
        }
        if b - a <= 1e-16 * (1.0 + a.abs().max(b.abs())) {
            break;
        }
    }
    let lambda = 0.5 * (a + b);
    v.iter().map(|x| (x - lambda).clamp(lo, hi)).collect()
}
