use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::allocation::{Allocation, Strategy};
use super::mean_variance::{validate_covariance_matrix, MeanVarianceOptimizer};
use crate::cancel::CancelToken;
use crate::error::FolioError;
use crate::estimation::{shrink, MomentEstimate};
use crate::linalg::{condition_number, quad_form, spd_inverse, symmetrize, to_matrix, to_rows};
use crate::prediction::PredictedView;
use crate::types::Ticker;
use crate::FolioResult;

const SHRINKAGE_LADDER: [f64; 6] = [0.05, 0.10, 0.20, 0.40, 0.70, 1.0];
const RISK_AVERSION_RANGE: (f64, f64) = (0.5, 10.0);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Black-Litterman parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackLittermanSettings {
    /// Uncertainty scale on the equilibrium prior.
    pub tau: f64,
    /// Fixed market risk aversion; derived from the market proxy when absent.
    pub risk_aversion: Option<f64>,
    /// Used when the derived risk aversion is not finite or not positive.
    pub fallback_risk_aversion: f64,
    /// Condition number above which `τΣ` is shrunk before inversion.
    pub condition_threshold: f64,
}

impl Default for BlackLittermanSettings {
    fn default() -> Self {
        Self {
            tau: 0.05,
            risk_aversion: None,
            fallback_risk_aversion: 2.5,
            condition_threshold: 1e8,
        }
    }
}

/// Annual moments of the market proxy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketProxy {
    pub expected_return: f64,
    pub variance: f64,
}

/// Market-equilibrium inputs: reference weights and, optionally, a proxy
/// series' moments for deriving risk aversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrior {
    pub weights: Vec<f64>,
    pub proxy: Option<MarketProxy>,
}

impl MarketPrior {
    pub fn equal_weight(n: usize) -> Self {
        Self {
            weights: vec![1.0 / n as f64; n],
            proxy: None,
        }
    }
}

/// Prior and posterior moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    /// Implied equilibrium returns: `Π = δΣw_mkt`.
    pub implied_returns: Vec<f64>,
    pub posterior_returns: Vec<f64>,
    pub posterior_covariance: Vec<Vec<f64>>,
    pub risk_aversion: f64,
    pub tau: f64,
    /// Shrinkage applied to Σ so `τΣ` could be inverted.
    pub shrinkage: f64,
    pub warnings: Vec<String>,
}

/// Black-Litterman allocation together with the posterior it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackLittermanAllocation {
    pub allocation: Allocation,
    pub posterior: Posterior,
    pub market_weights: Vec<f64>,
    /// `w - w_mkt` per ticker.
    pub tilts: Vec<f64>,
}

/// Blends the equilibrium prior with one absolute view per asset, then
/// runs the mean-variance solve on the posterior.
#[derive(Debug, Clone)]
pub struct BlackLittermanOptimizer {
    pub settings: BlackLittermanSettings,
    pub risk_free_rate: f64,
    pub optimizer: MeanVarianceOptimizer,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl BlackLittermanOptimizer {
    pub fn new(settings: BlackLittermanSettings, optimizer: MeanVarianceOptimizer) -> Self {
        Self {
            settings,
            risk_free_rate: optimizer.risk_free_rate,
            optimizer,
        }
    }

    /// Risk aversion from the configured value or the market proxy,
    /// clamped to a sane range.
    pub fn risk_aversion(
        &self,
        cov: &[Vec<f64>],
        prior: &MarketPrior,
        mu: &[f64],
        warnings: &mut Vec<String>,
    ) -> f64 {
        let raw = match self.settings.risk_aversion {
            Some(delta) => delta,
            None => {
                let proxy = prior.proxy.unwrap_or_else(|| MarketProxy {
                    expected_return: prior.weights.iter().zip(mu).map(|(w, m)| w * m).sum(),
                    variance: quad_form(&prior.weights, cov),
                });
                let derived = (proxy.expected_return - self.risk_free_rate) / proxy.variance;
                if derived.is_finite() && derived > 0.0 {
                    derived
                } else {
                    warnings.push(format!(
                        "Market risk aversion could not be derived; using {}",
                        self.settings.fallback_risk_aversion
                    ));
                    warn!(derived, "falling back to default risk aversion");
                    self.settings.fallback_risk_aversion
                }
            }
        };
        let (lo, hi) = RISK_AVERSION_RANGE;
        let delta = raw.clamp(lo, hi);
        if delta != raw {
            warnings.push(format!("Risk aversion {:.3} clamped to {:.3}", raw, delta));
        }
        delta
    }

    /// Posterior moments for absolute views `P = I`, `Q = views`, with
    /// `Ω⁻¹_ii = confidence_i / (τΣ_ii)`.
    pub fn posterior(
        &self,
        cov: &[Vec<f64>],
        prior: &MarketPrior,
        mu: &[f64],
        views: &[PredictedView],
    ) -> FolioResult<Posterior> {
        let n = cov.len();
        validate_covariance_matrix(cov, n)?;
        if prior.weights.len() != n || views.len() != n || mu.len() != n {
            return Err(FolioError::invalid(
                "views",
                format!("expected {} market weights, returns and views", n),
            ));
        }
        let tau = self.settings.tau;
        if !(tau.is_finite() && tau > 0.0) {
            return Err(FolioError::invalid("tau", "must be positive"));
        }

        let mut warnings = Vec::new();
        let delta = self.risk_aversion(cov, prior, mu, &mut warnings);

        let (sigma, tau_sigma_inv, shrinkage) = self.invert_scaled(cov, tau)?;
        if shrinkage > 0.0 {
            warnings.push(format!(
                "Prior covariance shrunk by {:.2} before inversion",
                shrinkage
            ));
        }

        let w_mkt = DVector::from_column_slice(&prior.weights);
        let pi = (&sigma * &w_mkt) * delta;

        let omega_inv = DVector::from_iterator(
            n,
            views
                .iter()
                .enumerate()
                .map(|(i, v)| v.confidence / (tau * sigma[(i, i)])),
        );
        if omega_inv.iter().any(|x| !x.is_finite()) {
            return Err(FolioError::unstable(
                "black-litterman",
                "view uncertainty is not finite",
            ));
        }
        let q = DVector::from_iterator(n, views.iter().map(|v| v.expected_return));

        let a = &tau_sigma_inv + DMatrix::from_diagonal(&omega_inv);
        let a_inv = spd_inverse(&symmetrize(&a)).ok_or_else(|| {
            FolioError::unstable("black-litterman", "posterior precision is not invertible")
        })?;
        let b = &tau_sigma_inv * &pi + omega_inv.component_mul(&q);
        let mu_post = &a_inv * b;
        let sigma_post = symmetrize(&(&sigma + &a_inv));

        debug!(delta, tau, shrinkage, "posterior computed");

        Ok(Posterior {
            implied_returns: pi.iter().copied().collect(),
            posterior_returns: mu_post.iter().copied().collect(),
            posterior_covariance: to_rows(&sigma_post),
            risk_aversion: delta,
            tau,
            shrinkage,
            warnings,
        })
    }

    /// Posterior, max-Sharpe solve, and projection.
    pub fn optimize(
        &self,
        estimate: &MomentEstimate,
        views: &[PredictedView],
        prior: &MarketPrior,
        cancel: &CancelToken,
    ) -> FolioResult<BlackLittermanAllocation> {
        let tickers: &[Ticker] = &estimate.tickers;
        let aligned = align_views(tickers, views)?;
        let posterior = self.posterior(
            &estimate.covariance,
            prior,
            &estimate.expected_returns,
            &aligned,
        )?;
        cancel.check()?;

        let mut allocation = self.optimizer.optimize_with(
            Strategy::BlackLitterman,
            tickers,
            &posterior.posterior_returns,
            &posterior.posterior_covariance,
            &estimate.covariance,
            cancel,
        )?;

        let tilts: Vec<f64> = allocation
            .weights
            .iter()
            .zip(prior.weights.iter())
            .map(|(w, m)| w - m)
            .collect();

        let mut warnings = posterior.warnings.clone();
        for (t, tilt) in tickers.iter().zip(tilts.iter()) {
            if tilt.abs() > 0.20 {
                warnings.push(format!("Large tilt from market: {} tilt = {:.4}", t, tilt));
            }
        }
        warnings.append(&mut allocation.warnings);
        allocation.warnings = warnings;

        info!(
            risk_aversion = posterior.risk_aversion,
            shrinkage = posterior.shrinkage,
            "black-litterman allocation complete"
        );

        Ok(BlackLittermanAllocation {
            allocation,
            market_weights: prior.weights.clone(),
            tilts,
            posterior,
        })
    }

    /// Invert `τΣ`, shrinking Σ toward its diagonal when it is ill
    /// conditioned or not positive definite.
    fn invert_scaled(
        &self,
        cov: &[Vec<f64>],
        tau: f64,
    ) -> FolioResult<(DMatrix<f64>, DMatrix<f64>, f64)> {
        let attempt = |gamma: f64| -> Option<(DMatrix<f64>, DMatrix<f64>)> {
            let sigma = if gamma > 0.0 {
                to_matrix(&shrink(cov, gamma))
            } else {
                to_matrix(cov)
            };
            let scaled = sigma.scale(tau);
            if condition_number(&scaled) > self.settings.condition_threshold {
                return None;
            }
            spd_inverse(&scaled).map(|inv| (sigma, inv))
        };

        if let Some((sigma, inv)) = attempt(0.0) {
            return Ok((sigma, inv, 0.0));
        }
        for gamma in SHRINKAGE_LADDER {
            if let Some((sigma, inv)) = attempt(gamma) {
                return Ok((sigma, inv, gamma));
            }
        }
        Err(FolioError::unstable(
            "black-litterman",
            "prior covariance singular after shrinkage",
        ))
    }
}

/// Order views like `tickers`; every ticker needs exactly one view.
pub fn align_views(tickers: &[Ticker], views: &[PredictedView]) -> FolioResult<Vec<PredictedView>> {
    tickers
        .iter()
        .map(|t| {
            views
                .iter()
                .find(|v| &v.ticker == t)
                .cloned()
                .ok_or_else(|| FolioError::DataUnavailable {
                    ticker: t.clone(),
                    reason: "no return prediction".into(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::constraints::{ConstraintProjector, WeightBounds};
    use approx::assert_relative_eq;

    fn cov3() -> Vec<Vec<f64>> {
        vec![
            vec![0.0225, 0.009, 0.00375],
            vec![0.009, 0.04, 0.025],
            vec![0.00375, 0.025, 0.0625],
        ]
    }

    fn optimizer(delta: Option<f64>) -> BlackLittermanOptimizer {
        let settings = BlackLittermanSettings {
            risk_aversion: delta,
            ..BlackLittermanSettings::default()
        };
        let mvo = MeanVarianceOptimizer::new(ConstraintProjector::new(WeightBounds::default()))
            .with_risk_free_rate(0.02);
        BlackLittermanOptimizer::new(settings, mvo)
    }

    fn views(q: [f64; 3], c: f64) -> Vec<PredictedView> {
        ["A", "B", "C"]
            .iter()
            .zip(q)
            .map(|(t, r)| PredictedView::new(*t, r, c))
            .collect()
    }

    #[test]
    fn test_zero_confidence_returns_prior() {
        let cov = cov3();
        let prior = MarketPrior::equal_weight(3);
        let post = optimizer(Some(2.5))
            .posterior(&cov, &prior, &[0.1, 0.1, 0.1], &views([0.5, -0.5, 0.9], 0.0))
            .unwrap();
        for (p, m) in post.posterior_returns.iter().zip(post.implied_returns.iter()) {
            assert_relative_eq!(*p, *m, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_implied_returns_formula() {
        let cov = cov3();
        let prior = MarketPrior::equal_weight(3);
        let post = optimizer(Some(3.0))
            .posterior(&cov, &prior, &[0.0; 3], &views([0.0; 3], 0.0))
            .unwrap();
        let expected_a = 3.0 * (0.0225 + 0.009 + 0.00375) / 3.0;
        assert_relative_eq!(post.implied_returns[0], expected_a, epsilon = 1e-12);
        assert_eq!(post.risk_aversion, 3.0);
    }

    #[test]
    fn test_confident_view_pulls_posterior() {
        let cov = cov3();
        let prior = MarketPrior::equal_weight(3);
        let opt = optimizer(Some(2.5));
        let none = opt
            .posterior(&cov, &prior, &[0.0; 3], &views([0.30, 0.0, 0.0], 0.0))
            .unwrap();
        let strong = opt
            .posterior(&cov, &prior, &[0.0; 3], &views([0.30, 0.0, 0.0], 1.0))
            .unwrap();
        assert!(strong.posterior_returns[0] > none.posterior_returns[0]);
        assert!(strong.posterior_returns[0] < 0.30);
        // Posterior covariance adds estimation uncertainty
        assert!(strong.posterior_covariance[0][0] > cov[0][0]);
    }

    #[test]
    fn test_risk_aversion_derived_and_clamped() {
        let cov = cov3();
        let opt = optimizer(None);
        let mut warnings = Vec::new();
        let prior = MarketPrior {
            weights: vec![1.0 / 3.0; 3],
            proxy: Some(MarketProxy {
                expected_return: 0.08,
                variance: 0.03,
            }),
        };
        let delta = opt.risk_aversion(&cov, &prior, &[0.0; 3], &mut warnings);
        assert_relative_eq!(delta, 2.0, epsilon = 1e-12);
        assert!(warnings.is_empty());

        let losing = MarketPrior {
            proxy: Some(MarketProxy {
                expected_return: -0.05,
                variance: 0.03,
            }),
            ..prior.clone()
        };
        assert_eq!(opt.risk_aversion(&cov, &losing, &[0.0; 3], &mut warnings), 2.5);
        assert_eq!(warnings.len(), 1);

        let steep = MarketPrior {
            proxy: Some(MarketProxy {
                expected_return: 0.52,
                variance: 0.01,
            }),
            ..prior
        };
        assert_eq!(opt.risk_aversion(&cov, &steep, &[0.0; 3], &mut warnings), 10.0);
    }

    #[test]
    fn test_singular_prior_is_shrunk() {
        let cov = vec![vec![0.04, 0.04], vec![0.04, 0.04]];
        let post = optimizer(Some(2.5))
            .posterior(
                &cov,
                &MarketPrior::equal_weight(2),
                &[0.0; 2],
                &[PredictedView::new("A", 0.1, 0.5), PredictedView::new("B", 0.05, 0.5)],
            )
            .unwrap();
        assert!(post.shrinkage > 0.0);
    }

    #[test]
    fn test_optimize_produces_feasible_weights() {
        let est = MomentEstimate {
            tickers: vec!["A".into(), "B".into(), "C".into()],
            expected_returns: vec![0.08, 0.06, 0.07],
            covariance: cov3(),
            observations: 250,
            periods_per_year: 252.0,
            shrinkage: 0.0,
            ridge: 0.0,
            condition_number: 5.0,
        };
        let out = optimizer(None)
            .optimize(
                &est,
                &views([0.12, 0.03, 0.06], 0.6),
                &MarketPrior::equal_weight(3),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(out.allocation.is_fully_invested());
        assert_eq!(out.allocation.strategy, Strategy::BlackLitterman);
        assert_eq!(out.tilts.len(), 3);
        assert!(out.allocation.weights[0] > out.allocation.weights[1]);
    }

    #[test]
    fn test_missing_view_rejected() {
        let err = align_views(&["A".into(), "B".into()], &[PredictedView::new("A", 0.1, 0.5)])
            .unwrap_err();
        assert!(matches!(err, FolioError::DataUnavailable { ref ticker, .. } if ticker == "B"));
        assert_eq!(err.kind(), crate::error::ErrorKind::DataUnavailable);
    }
}
