//! Box-and-budget constrained portfolio programs, solved with Clarabel.
//!
//! Every program shares the feasible set `{Σw = 1, lo ≤ w ≤ hi}`. The
//! covariance is rescaled by its largest eigenvalue before it reaches the
//! solver, and a proximal term `ε‖w − w_eq‖²` makes every objective strictly
//! convex, so when several portfolios tie the one closest to equal weight
//! wins.

use clarabel::algebra::CscMatrix;
use clarabel::solver::SupportedConeT::{NonnegativeConeT, SecondOrderConeT, ZeroConeT};
use clarabel::solver::{DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::constraints::{project_capped_simplex, WeightBounds};
use crate::cancel::CancelToken;
use crate::error::FolioError;
use crate::linalg::{dot, max_eigenvalue, psd_factor, quad_form, to_matrix};
use crate::FolioResult;

/// Proximal weight on the rescaled problem.
const PROX: f64 = 1e-8;

/// Iteration budget and tolerance handed to the interior-point solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: u32,
    /// Duality-gap and feasibility tolerance.
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-9,
        }
    }
}

/// A solved portfolio with its ex-ante moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
}

impl FrontierPoint {
    pub fn sharpe(&self, rf: f64) -> f64 {
        if self.volatility > 1e-15 {
            (self.expected_return - rf) / self.volatility
        } else {
            f64::NEG_INFINITY
        }
    }
}

// ---------------------------------------------------------------------------
// Frontier solver
// ---------------------------------------------------------------------------

pub struct FrontierSolver<'a> {
    cov: &'a [Vec<f64>],
    mu: &'a [f64],
    bounds: WeightBounds,
    settings: SolverSettings,
    cancel: &'a CancelToken,
    /// `Σ / scale`, what the solver actually sees.
    scaled_cov: Vec<Vec<f64>>,
    scale: f64,
    anchor: Vec<f64>,
}

impl<'a> FrontierSolver<'a> {
    pub fn new(
        cov: &'a [Vec<f64>],
        mu: &'a [f64],
        bounds: WeightBounds,
        settings: SolverSettings,
        cancel: &'a CancelToken,
    ) -> FolioResult<Self> {
        let n = mu.len();
        if cov.len() != n || cov.iter().any(|row| row.len() != n) {
            return Err(FolioError::invalid(
                "covariance",
                format!("expected {}x{} matrix", n, n),
            ));
        }
        if mu.iter().any(|m| !m.is_finite()) || cov.iter().flatten().any(|c| !c.is_finite()) {
            return Err(FolioError::unstable("frontier solver", "non-finite moments"));
        }
        bounds.validate(n)?;

        let lambda_max = max_eigenvalue(&to_matrix(cov));
        let scale = if lambda_max.is_finite() && lambda_max > 0.0 {
            lambda_max
        } else {
            1.0
        };
        let scaled_cov = cov
            .iter()
            .map(|row| row.iter().map(|c| c / scale).collect())
            .collect();

        Ok(Self {
            cov,
            mu,
            bounds,
            settings,
            cancel,
            scaled_cov,
            scale,
            anchor: vec![1.0 / n as f64; n],
        })
    }

    pub fn point(&self, weights: Vec<f64>) -> FrontierPoint {
        let expected_return = dot(&weights, self.mu);
        let volatility = quad_form(&weights, self.cov).max(0.0).sqrt();
        FrontierPoint {
            weights,
            expected_return,
            volatility,
        }
    }

    /// Lowest and highest expected return attainable under the bounds.
    pub fn return_range(&self) -> (f64, f64) {
        attainable_return_range(self.mu, self.bounds)
    }

    pub fn min_variance(&self) -> FolioResult<FrontierPoint> {
        self.cancel.check()?;
        if let Some(pinned) = self.pinned() {
            return Ok(pinned);
        }
        let mut program = ConicProgram::new(self.proximal_cost(), self.proximal_linear());
        self.add_feasible_set(&mut program);
        let x = program.solve(&self.settings, "minimum variance")?;
        Ok(self.finish(&x))
    }

    /// Maximum Sharpe ratio portfolio under the bounds.
    ///
    /// Solved in homogenized form over `(y, κ)`:
    ///
    /// ```text
    /// minimize   y'Σy
    /// subject to (μ − r_f)'y = 1,  Σy = κ,  lo·κ ≤ y ≤ hi·κ,  κ ≥ 0
    /// ```
    ///
    /// and mapped back with `w = y / κ`. When no feasible portfolio earns
    /// more than `rf` the minimum-variance portfolio is returned.
    pub fn max_sharpe(&self, rf: f64) -> FolioResult<FrontierPoint> {
        self.cancel.check()?;
        if let Some(pinned) = self.pinned() {
            return Ok(pinned);
        }
        let (_, best) = self.return_range();
        if best <= rf + 1e-12 {
            return self.min_variance();
        }

        let n = self.mu.len();
        let (lo, hi) = (self.bounds.min, self.bounds.max);

        // P = [[Σ + εI, −ε·w_eq], [−ε·w_eq', ε·‖w_eq‖²]]
        let mut p = vec![vec![0.0; n + 1]; n + 1];
        for i in 0..n {
            p[i][..n].copy_from_slice(&self.scaled_cov[i]);
            p[i][i] += PROX;
            p[i][n] = -PROX * self.anchor[i];
            p[n][i] = -PROX * self.anchor[i];
        }
        p[n][n] = PROX * dot(&self.anchor, &self.anchor);

        let mut program = ConicProgram::new(p, vec![0.0; n + 1]);
        let mut excess: Vec<f64> = self.mu.iter().map(|m| m - rf).collect();
        excess.push(0.0);
        program.equal(excess, 1.0);
        let mut budget = vec![1.0; n + 1];
        budget[n] = -1.0;
        program.equal(budget, 0.0);
        for i in 0..n {
            if hi < 1.0 {
                let mut row = unit(n + 1, i, 1.0);
                row[n] = -hi;
                program.at_most(row, 0.0);
            }
            let mut row = unit(n + 1, i, -1.0);
            row[n] = lo;
            program.at_most(row, 0.0);
        }
        program.at_most(unit(n + 1, n, -1.0), 0.0);

        let x = program.solve(&self.settings, "maximum sharpe")?;
        let kappa = x[n];
        if !(kappa.is_finite() && kappa > 1e-12) {
            return Err(FolioError::unstable(
                "maximum sharpe",
                format!("degenerate homogenizing scale {:.3e}", kappa),
            ));
        }
        let w: Vec<f64> = x[..n].iter().map(|y| y / kappa).collect();
        let champion = self.finish(&w);
        debug!(
            expected_return = champion.expected_return,
            volatility = champion.volatility,
            "tangency portfolio located"
        );
        Ok(champion)
    }

    /// Minimum-variance portfolio earning exactly `target`.
    pub fn target_return(&self, target: f64) -> FolioResult<FrontierPoint> {
        self.cancel.check()?;
        let (lo, hi) = self.return_range();
        if target > hi + 1e-9 || target < lo - 1e-9 {
            return Err(FolioError::ConstraintInfeasible(format!(
                "target return {:.4} outside attainable range [{:.4}, {:.4}]",
                target, lo, hi
            )));
        }
        if hi - lo <= 1e-12 {
            // Every feasible portfolio earns the same.
            return self.min_variance();
        }
        if let Some(pinned) = self.pinned() {
            return Ok(pinned);
        }

        let mut program = ConicProgram::new(self.proximal_cost(), self.proximal_linear());
        self.add_feasible_set(&mut program);
        program.equal(self.mu.to_vec(), target.clamp(lo, hi));
        let x = program.solve(&self.settings, "target return")?;
        Ok(self.finish(&x))
    }

    /// Highest-return portfolio with volatility at most `target`. Falls
    /// back to the minimum-variance portfolio when even that exceeds the
    /// target.
    ///
    /// The risk limit is a second-order cone `‖F'w‖ ≤ target` with
    /// `Σ = FF'`.
    pub fn target_volatility(&self, target: f64) -> FolioResult<FrontierPoint> {
        let base = self.min_variance()?;
        if base.volatility >= target || self.pinned().is_some() {
            return Ok(base);
        }
        self.cancel.check()?;

        let n = self.mu.len();
        let mu_scale = self
            .mu
            .iter()
            .fold(0.0_f64, |acc, m| acc.max(m.abs()))
            .max(1e-12);
        let mut linear = self.proximal_linear();
        for (q, m) in linear.iter_mut().zip(self.mu) {
            *q -= m / mu_scale;
        }
        let mut program = ConicProgram::new(proximal_identity(n), linear);
        self.add_feasible_set(&mut program);

        let mut cone = Vec::with_capacity(n + 1);
        cone.push((vec![0.0; n], target / self.scale.sqrt()));
        for row in psd_factor(&self.scaled_cov) {
            cone.push((row.iter().map(|f| -f).collect(), 0.0));
        }
        program.second_order(cone);

        let x = program.solve(&self.settings, "target volatility")?;
        Ok(self.finish(&x))
    }

    // -----------------------------------------------------------------------
    // Program assembly
    // -----------------------------------------------------------------------

    /// The single feasible point when the bounds leave no freedom.
    fn pinned(&self) -> Option<FrontierPoint> {
        let n = self.mu.len() as f64;
        let tight = self.bounds.min * n >= 1.0 - 1e-9 || self.bounds.max * n <= 1.0 + 1e-9;
        tight.then(|| self.point(self.anchor.clone()))
    }

    /// `Σ + εI` on the rescaled covariance.
    fn proximal_cost(&self) -> Vec<Vec<f64>> {
        let mut p = self.scaled_cov.clone();
        for (i, row) in p.iter_mut().enumerate() {
            row[i] += PROX;
        }
        p
    }

    /// `−ε·w_eq`, the linear half of the proximal term.
    fn proximal_linear(&self) -> Vec<f64> {
        self.anchor.iter().map(|a| -PROX * a).collect()
    }

    fn add_feasible_set(&self, program: &mut ConicProgram) {
        let n = self.mu.len();
        program.equal(vec![1.0; n], 1.0);
        for i in 0..n {
            if self.bounds.max < 1.0 {
                program.at_most(unit(n, i, 1.0), self.bounds.max);
            }
            program.at_most(unit(n, i, -1.0), -self.bounds.min);
        }
    }

    /// Snap the interior-point solution onto the feasible set.
    fn finish(&self, x: &[f64]) -> FrontierPoint {
        let w = project_capped_simplex(&x[..self.mu.len()], self.bounds.min, self.bounds.max);
        self.point(w)
    }
}

/// Extreme values of `μ'w` over `{Σw = 1, lo ≤ w ≤ hi}`, found greedily.
pub fn attainable_return_range(mu: &[f64], bounds: WeightBounds) -> (f64, f64) {
    let n = mu.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| mu[a].partial_cmp(&mu[b]).unwrap_or(std::cmp::Ordering::Equal));

    let fill = |indices: &mut dyn Iterator<Item = usize>| -> f64 {
        let mut remaining = 1.0 - bounds.min * n as f64;
        let mut value: f64 = mu.iter().map(|m| m * bounds.min).sum();
        for i in indices {
            let extra = (bounds.max - bounds.min).min(remaining.max(0.0));
            value += extra * mu[i];
            remaining -= extra;
        }
        value
    };
    let low = fill(&mut order.iter().copied());
    let high = fill(&mut order.iter().rev().copied());
    (low, high)
}

fn unit(len: usize, at: usize, value: f64) -> Vec<f64> {
    let mut row = vec![0.0; len];
    row[at] = value;
    row
}

fn proximal_identity(n: usize) -> Vec<Vec<f64>> {
    (0..n).map(|i| unit(n, i, PROX)).collect()
}

// ---------------------------------------------------------------------------
// Clarabel
// ---------------------------------------------------------------------------

/// Dense program in Clarabel's standard form
/// `min ½x'Px + q'x  s.t.  Ax + s = b, s ∈ K`, rows grouped by cone.
struct ConicProgram {
    p: Vec<Vec<f64>>,
    q: Vec<f64>,
    zero: Vec<(Vec<f64>, f64)>,
    nonnegative: Vec<(Vec<f64>, f64)>,
    second_order: Vec<(Vec<f64>, f64)>,
}

impl ConicProgram {
    fn new(p: Vec<Vec<f64>>, q: Vec<f64>) -> Self {
        Self {
            p,
            q,
            zero: Vec::new(),
            nonnegative: Vec::new(),
            second_order: Vec::new(),
        }
    }

    /// `row · x = rhs`
    fn equal(&mut self, row: Vec<f64>, rhs: f64) {
        self.zero.push((row, rhs));
    }

    /// `row · x ≤ rhs`
    fn at_most(&mut self, row: Vec<f64>, rhs: f64) {
        self.nonnegative.push((row, rhs));
    }

    /// `b − Ax` lies in the second-order cone, first entry the radius.
    fn second_order(&mut self, rows: Vec<(Vec<f64>, f64)>) {
        self.second_order = rows;
    }

    fn solve(&self, settings: &SolverSettings, context: &str) -> FolioResult<Vec<f64>> {
        let n = self.q.len();
        let rows: Vec<&(Vec<f64>, f64)> = self
            .zero
            .iter()
            .chain(&self.nonnegative)
            .chain(&self.second_order)
            .collect();

        let p = upper_triangle(&self.p);
        let a = column_major(&rows, n);
        let b: Vec<f64> = rows.iter().map(|(_, rhs)| *rhs).collect();

        let mut cones = Vec::with_capacity(3);
        if !self.zero.is_empty() {
            cones.push(ZeroConeT(self.zero.len()));
        }
        if !self.nonnegative.is_empty() {
            cones.push(NonnegativeConeT(self.nonnegative.len()));
        }
        if !self.second_order.is_empty() {
            cones.push(SecondOrderConeT(self.second_order.len()));
        }

        let clarabel_settings = DefaultSettingsBuilder::default()
            .max_iter(settings.max_iterations)
            .tol_gap_abs(settings.tolerance)
            .tol_gap_rel(settings.tolerance)
            .tol_feas(settings.tolerance)
            .verbose(false)
            .build()
            .map_err(|e| FolioError::unstable(context, format!("invalid solver settings: {}", e)))?;

        let mut solver = DefaultSolver::new(&p, &self.q, &a, &b, &cones, clarabel_settings)
            .map_err(|e| FolioError::unstable(context, format!("solver setup failed: {:?}", e)))?;
        solver.solve();

        let status = solver.solution.status;
        debug!(
            context,
            ?status,
            iterations = solver.solution.iterations,
            "quadratic program solved"
        );
        match status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                let x = solver.solution.x.clone();
                if x.iter().all(|v| v.is_finite()) {
                    Ok(x)
                } else {
                    Err(FolioError::unstable(context, "solver returned non-finite weights"))
                }
            }
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => Err(
                FolioError::ConstraintInfeasible(format!("{}: no portfolio satisfies the constraints", context)),
            ),
            other => Err(FolioError::unstable(
                context,
                format!("solver stopped with status {:?}", other),
            )),
        }
    }
}

/// Upper triangle of a symmetric matrix in CSC form.
fn upper_triangle(mat: &[Vec<f64>]) -> CscMatrix<f64> {
    let n = mat.len();
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..n {
        for (i, row) in mat.iter().enumerate().take(j + 1) {
            if row[j] != 0.0 {
                rowval.push(i);
                nzval.push(row[j]);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(n, n, colptr, rowval, nzval)
}

fn column_major(rows: &[&(Vec<f64>, f64)], n: usize) -> CscMatrix<f64> {
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..n {
        for (i, (row, _)) in rows.iter().enumerate() {
            if row[j] != 0.0 {
                rowval.push(i);
                nzval.push(row[j]);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(rows.len(), n, colptr, rowval, nzval)
}
