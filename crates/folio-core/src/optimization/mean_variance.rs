use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::allocation::{concentration_warnings, Allocation, Strategy};
use super::constraints::ConstraintProjector;
use super::qp::{FrontierPoint, FrontierSolver, SolverSettings};
use crate::cancel::CancelToken;
use crate::error::FolioError;
use crate::linalg::{dot, quad_form};
use crate::types::Ticker;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which point of the efficient frontier to pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Tangency portfolio.
    #[default]
    MaxSharpe,
    /// Minimum variance at a fixed expected return.
    TargetReturn,
    /// Highest return with volatility at most the projector's target.
    TargetVolatility,
}

/// Markowitz optimizer under shared box bounds.
#[derive(Debug, Clone)]
pub struct MeanVarianceOptimizer {
    pub projector: ConstraintProjector,
    pub solver: SolverSettings,
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
    pub objective: Objective,
    /// Annual target return as a fraction; required for `TargetReturn`.
    pub target_return: Option<f64>,
}

impl MeanVarianceOptimizer {
    pub fn new(projector: ConstraintProjector) -> Self {
        Self {
            projector,
            solver: SolverSettings::default(),
            risk_free_rate: 0.0,
            objective: Objective::MaxSharpe,
            target_return: None,
        }
    }

    pub fn with_objective(mut self, objective: Objective, target_return: Option<f64>) -> Self {
        self.objective = objective;
        self.target_return = target_return;
        self
    }

    pub fn with_risk_free_rate(mut self, rf: f64) -> Self {
        self.risk_free_rate = rf;
        self
    }

    pub fn with_solver(mut self, solver: SolverSettings) -> Self {
        self.solver = solver;
        self
    }

    /// Optimize against `(mu, cov)` and report volatility under the same
    /// covariance.
    pub fn optimize(
        &self,
        tickers: &[Ticker],
        mu: &[f64],
        cov: &[Vec<f64>],
        cancel: &CancelToken,
    ) -> FolioResult<Allocation> {
        self.optimize_with(Strategy::Mvo, tickers, mu, cov, cov, cancel)
    }

    /// Optimize against `(mu, solve_cov)`; the projector checks the result
    /// against `risk_cov`. Black-Litterman solves under its posterior
    /// covariance but is held to the sample-covariance volatility target.
    pub(crate) fn optimize_with(
        &self,
        strategy: Strategy,
        tickers: &[Ticker],
        mu: &[f64],
        solve_cov: &[Vec<f64>],
        risk_cov: &[Vec<f64>],
        cancel: &CancelToken,
    ) -> FolioResult<Allocation> {
        let n = tickers.len();
        if mu.len() != n {
            return Err(FolioError::invalid(
                "expected_returns",
                format!("expected {} returns but got {}", n, mu.len()),
            ));
        }
        validate_covariance_matrix(solve_cov, n)?;
        validate_covariance_matrix(risk_cov, n)?;

        let solver = FrontierSolver::new(solve_cov, mu, self.projector.bounds, self.solver, cancel)?;
        let mut warnings = Vec::new();

        let point = match self.objective {
            Objective::MaxSharpe => {
                let (_, best_return) = solver.return_range();
                if best_return <= self.risk_free_rate {
                    warnings.push(format!(
                        "No feasible portfolio beats the risk-free rate {:.4}; using minimum variance",
                        self.risk_free_rate
                    ));
                    warn!(%strategy, "no positive excess return, falling back to minimum variance");
                    solver.min_variance()?
                } else {
                    solver.max_sharpe(self.risk_free_rate)?
                }
            }
            Objective::TargetReturn => {
                let target = self.target_return.ok_or_else(|| {
                    FolioError::invalid("target_return_pct", "required for the target_return objective")
                })?;
                let p = solver.target_return(target)?;
                if (p.expected_return - target).abs() > 1e-6 {
                    warnings.push(format!(
                        "Target return {:.4} approximated by {:.4}",
                        target, p.expected_return
                    ));
                }
                p
            }
            Objective::TargetVolatility => {
                let target = self.projector.target_volatility.ok_or_else(|| {
                    FolioError::invalid(
                        "target_volatility_pct",
                        "required for the target_volatility objective",
                    )
                })?;
                solve_volatility_target(&solver, target, risk_cov)?
            }
        };

        let projection = self.projector.project(&point.weights, Some(risk_cov))?;
        warnings.extend(projection.warnings);
        warnings.extend(concentration_warnings(tickers, &projection.weights, 0.40));

        info!(
            %strategy,
            expected_return = dot(&projection.weights, mu),
            volatility = projection.volatility.unwrap_or_default(),
            degraded = projection.degraded,
            "allocation optimized"
        );

        Ok(Allocation {
            strategy,
            tickers: tickers.to_vec(),
            expected_return: Some(dot(&projection.weights, mu)),
            expected_volatility: projection.volatility,
            weights: projection.weights,
            degraded: projection.degraded,
            warnings,
        })
    }
}

/// The frontier is traced under the solve covariance; when it differs from
/// the risk covariance the volatility target is re-scaled so the solved
/// point lands on the target under the risk covariance.
fn solve_volatility_target(
    solver: &FrontierSolver<'_>,
    target: f64,
    risk_cov: &[Vec<f64>],
) -> FolioResult<FrontierPoint> {
    let first = solver.target_volatility(target)?;
    let risk_vol = quad_form(&first.weights, risk_cov).max(0.0).sqrt();
    if first.volatility <= 0.0 || risk_vol <= 0.0 || (risk_vol - target).abs() <= 1e-9 {
        return Ok(first);
    }
    solver.target_volatility(target * first.volatility / risk_vol)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[allow(clippy::needless_range_loop)]
pub(crate) fn validate_covariance_matrix(cov: &[Vec<f64>], n: usize) -> FolioResult<()> {
    if cov.len() != n {
        return Err(FolioError::invalid(
            "covariance_matrix",
            format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        ));
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(FolioError::invalid(
                "covariance_matrix",
                format!("Row {} has {} columns, expected {}", i, row.len(), n),
            ));
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            let scale = cov[i][j].abs().max(cov[j][i].abs()).max(1e-12);
            if (cov[i][j] - cov[j][i]).abs() > 1e-9 * scale {
                return Err(FolioError::invalid(
                    "covariance_matrix",
                    format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                ));
            }
        }
    }
    Ok(())
}
