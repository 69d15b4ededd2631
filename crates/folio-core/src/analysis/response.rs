use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::request::AnalysisRequest;
use crate::backtest::{BacktestResult, PerformanceMetrics};
use crate::error::{ErrorKind, FolioError};
use crate::estimation::MomentEstimate;
use crate::optimization::{Allocation, BlackLittermanAllocation};
use crate::prediction::PredictedView;
use crate::types::{fraction_to_pct, to_decimal, Ratio, Ticker};

/// Decimal places for percentages and ratios.
const PCT_DP: u32 = 4;
/// Decimal places for equity curve levels.
const VALUE_DP: u32 = 6;
/// Decimal places for weights in percent; keeps the reported weights summing
/// to 100 within 1e-4.
const WEIGHT_DP: u32 = 8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of one strategy: either a full report or the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyOutcome {
    Completed(StrategyReport),
    Failed { kind: ErrorKind, message: String },
}

impl StrategyOutcome {
    pub fn failed(error: &FolioError) -> Self {
        StrategyOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn report(&self) -> Option<&StrategyReport> {
        match self {
            StrategyOutcome::Completed(r) => Some(r),
            StrategyOutcome::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StrategyOutcome::Completed(_))
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            StrategyOutcome::Failed { kind, .. } => Some(*kind),
            StrategyOutcome::Completed(_) => None,
        }
    }
}

/// Point on a reported equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedEquityPoint {
    pub date: NaiveDate,
    pub value: Decimal,
}

/// Weights, backtest figures and diagnostics of one completed strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    /// Ticker to weight in percent.
    pub weights: BTreeMap<Ticker, Decimal>,
    pub sharpe: Ratio<Decimal>,
    pub sortino: Ratio<Decimal>,
    pub calmar: Ratio<Decimal>,
    pub max_drawdown_pct: Decimal,
    pub total_return_pct: Decimal,
    pub annualized_return_pct: Decimal,
    pub annualized_volatility_pct: Decimal,
    /// Ex-ante figures from the estimation window.
    pub expected_return_pct: Option<Decimal>,
    pub expected_volatility_pct: Option<Decimal>,
    /// Set when the volatility target could not be met within bounds.
    pub degraded: bool,
    pub rebalances: usize,
    pub equity_curve: Vec<ReportedEquityPoint>,
    pub warnings: Vec<String>,
    /// The same weights held through the post-backtest period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backtest: Option<PeriodReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_litterman: Option<BlackLittermanReport>,
}

/// Performance of fixed weights over a single evaluation period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub sharpe: Ratio<Decimal>,
    pub sortino: Ratio<Decimal>,
    pub calmar: Ratio<Decimal>,
    pub max_drawdown_pct: Decimal,
    pub total_return_pct: Decimal,
    pub annualized_return_pct: Decimal,
    pub annualized_volatility_pct: Decimal,
    pub rebalances: usize,
    pub equity_curve: Vec<ReportedEquityPoint>,
}

/// Posterior diagnostics of the Black-Litterman strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackLittermanReport {
    pub risk_aversion: Decimal,
    pub tau: Decimal,
    pub shrinkage: Decimal,
    pub implied_returns_pct: BTreeMap<Ticker, Decimal>,
    pub posterior_returns_pct: BTreeMap<Ticker, Decimal>,
    pub market_weights_pct: BTreeMap<Ticker, Decimal>,
    /// Strategy weight minus market weight, in percent.
    pub tilts_pct: BTreeMap<Ticker, Decimal>,
}

/// A model's view as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub predicted_return_pct: Decimal,
    pub confidence: Decimal,
}

/// How the moment estimates were obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationReport {
    pub observations: usize,
    pub estimation_start: NaiveDate,
    pub estimation_end: NaiveDate,
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backtest_start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backtest_end: Option<NaiveDate>,
    pub shrinkage: Decimal,
    pub ridge: f64,
    /// `None` when the covariance is singular.
    pub condition_number: Option<f64>,
}

/// Full answer to an [`AnalysisRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub request: AnalysisRequest,
    pub black_litterman: StrategyOutcome,
    pub mvo: StrategyOutcome,
    pub equal_weight: StrategyOutcome,
    pub predictions: BTreeMap<Ticker, PredictionReport>,
    pub estimation: EstimationReport,
    pub warnings: Vec<String>,
}

impl AnalysisResponse {
    pub fn outcomes(&self) -> [(&'static str, &StrategyOutcome); 3] {
        [
            ("black_litterman", &self.black_litterman),
            ("mvo", &self.mvo),
            ("equal_weight", &self.equal_weight),
        ]
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

impl StrategyReport {
    pub fn assemble(
        allocation: &Allocation,
        backtest: &BacktestResult,
        metrics: &PerformanceMetrics,
    ) -> Self {
        let reported = metrics.reported();
        let mut warnings = allocation.warnings.clone();
        warnings.extend(backtest.warnings.iter().cloned());

        Self {
            weights: weight_map(&allocation.tickers, &allocation.weights),
            sharpe: reported.sharpe,
            sortino: reported.sortino,
            calmar: reported.calmar,
            max_drawdown_pct: reported.max_drawdown_pct,
            total_return_pct: reported.total_return_pct,
            annualized_return_pct: reported.annualized_return_pct,
            annualized_volatility_pct: reported.annualized_volatility_pct,
            expected_return_pct: allocation
                .expected_return
                .map(|r| fraction_to_pct(r, PCT_DP)),
            expected_volatility_pct: allocation
                .expected_volatility
                .map(|v| fraction_to_pct(v, PCT_DP)),
            degraded: allocation.degraded,
            rebalances: backtest.rebalances,
            equity_curve: reported_curve(backtest),
            warnings,
            post_backtest: None,
            black_litterman: None,
        }
    }

    pub fn with_post_backtest(mut self, backtest: &BacktestResult, metrics: &PerformanceMetrics) -> Self {
        self.warnings.extend(
            backtest
                .warnings
                .iter()
                .map(|w| format!("Post-backtest: {}", w)),
        );
        self.post_backtest = PeriodReport::from_backtest(backtest, metrics);
        self
    }

    pub fn with_black_litterman(mut self, bl: &BlackLittermanAllocation) -> Self {
        let tickers = &bl.allocation.tickers;
        self.black_litterman = Some(BlackLittermanReport {
            risk_aversion: to_decimal(bl.posterior.risk_aversion, PCT_DP),
            tau: to_decimal(bl.posterior.tau, PCT_DP),
            shrinkage: to_decimal(bl.posterior.shrinkage, PCT_DP),
            implied_returns_pct: pct_map(tickers, &bl.posterior.implied_returns),
            posterior_returns_pct: pct_map(tickers, &bl.posterior.posterior_returns),
            market_weights_pct: weight_map(tickers, &bl.market_weights),
            tilts_pct: weight_map(tickers, &bl.tilts),
        });
        self
    }
}

impl PeriodReport {
    /// `None` for an empty curve.
    pub fn from_backtest(backtest: &BacktestResult, metrics: &PerformanceMetrics) -> Option<Self> {
        let first = backtest.equity_curve.first()?;
        let last = backtest.equity_curve.last()?;
        let reported = metrics.reported();
        Some(Self {
            start: first.date,
            end: last.date,
            sharpe: reported.sharpe,
            sortino: reported.sortino,
            calmar: reported.calmar,
            max_drawdown_pct: reported.max_drawdown_pct,
            total_return_pct: reported.total_return_pct,
            annualized_return_pct: reported.annualized_return_pct,
            annualized_volatility_pct: reported.annualized_volatility_pct,
            rebalances: backtest.rebalances,
            equity_curve: reported_curve(backtest),
        })
    }
}

impl PredictionReport {
    pub fn from_view(view: &PredictedView) -> Self {
        Self {
            predicted_return_pct: fraction_to_pct(view.expected_return, PCT_DP),
            confidence: to_decimal(view.confidence, PCT_DP),
        }
    }
}

impl EstimationReport {
    pub fn from_estimate(
        estimate: &MomentEstimate,
        estimation_window: (NaiveDate, NaiveDate),
        backtest_window: (NaiveDate, NaiveDate),
        post_backtest_window: Option<(NaiveDate, NaiveDate)>,
    ) -> Self {
        Self {
            observations: estimate.observations,
            estimation_start: estimation_window.0,
            estimation_end: estimation_window.1,
            backtest_start: backtest_window.0,
            backtest_end: backtest_window.1,
            post_backtest_start: post_backtest_window.map(|w| w.0),
            post_backtest_end: post_backtest_window.map(|w| w.1),
            shrinkage: to_decimal(estimate.shrinkage, PCT_DP),
            ridge: estimate.ridge,
            condition_number: estimate
                .condition_number
                .is_finite()
                .then_some(estimate.condition_number),
        }
    }
}

fn pct_map(tickers: &[Ticker], values: &[f64]) -> BTreeMap<Ticker, Decimal> {
    tickers
        .iter()
        .zip(values)
        .map(|(t, v)| (t.clone(), fraction_to_pct(*v, PCT_DP)))
        .collect()
}

fn weight_map(tickers: &[Ticker], weights: &[f64]) -> BTreeMap<Ticker, Decimal> {
    tickers
        .iter()
        .zip(weights)
        .map(|(t, w)| (t.clone(), fraction_to_pct(*w, WEIGHT_DP)))
        .collect()
}

fn reported_curve(backtest: &BacktestResult) -> Vec<ReportedEquityPoint> {
    backtest
        .equity_curve
        .iter()
        .map(|p| ReportedEquityPoint {
            date: p.date,
            value: to_decimal(p.value, VALUE_DP),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::EquityPoint;
    use crate::optimization::Strategy;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn allocation() -> Allocation {
        Allocation {
            strategy: Strategy::Mvo,
            tickers: vec!["A".into(), "B".into()],
            weights: vec![0.6, 0.4],
            expected_return: Some(0.08),
            expected_volatility: Some(0.12),
            degraded: false,
            warnings: vec!["from allocation".into()],
        }
    }

    fn backtest() -> BacktestResult {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        BacktestResult {
            equity_curve: vec![
                EquityPoint { date: d(2), value: 1.0 },
                EquityPoint { date: d(3), value: 1.0123456789 },
                EquityPoint { date: d(4), value: 0.99 },
            ],
            rebalances: 0,
            warnings: vec!["from backtest".into()],
        }
    }

    #[test]
    fn test_assemble_rounds_and_merges_warnings() {
        let bt = backtest();
        let metrics = PerformanceMetrics::from_equity_curve(&bt.values(), 252.0, 0.0).unwrap();
        let report = StrategyReport::assemble(&allocation(), &bt, &metrics);

        assert_eq!(report.weights["A"], dec!(60));
        assert_eq!(report.weights["B"], dec!(40));
        assert_eq!(report.expected_volatility_pct, Some(dec!(12)));
        assert_eq!(report.equity_curve[1].value, dec!(1.012346));
        assert_eq!(report.warnings, vec!["from allocation", "from backtest"]);
    }

    #[test]
    fn test_six_equal_weights_sum_to_hundred() {
        let tickers: Vec<Ticker> = ["A", "B", "C", "D", "E", "F"].iter().map(|t| t.to_string()).collect();
        let alloc = Allocation {
            strategy: Strategy::EqualWeight,
            tickers,
            weights: vec![1.0 / 6.0; 6],
            expected_return: None,
            expected_volatility: None,
            degraded: false,
            warnings: Vec::new(),
        };
        let bt = backtest();
        let metrics = PerformanceMetrics::from_equity_curve(&bt.values(), 252.0, 0.0).unwrap();
        let report = StrategyReport::assemble(&alloc, &bt, &metrics);

        let total: Decimal = report.weights.values().copied().sum();
        assert!((total - dec!(100)).abs() <= dec!(0.0001), "weights sum to {}", total);
        assert_eq!(report.weights["A"], dec!(16.66666667));
    }

    #[test]
    fn test_post_backtest_block() {
        let bt = backtest();
        let metrics = PerformanceMetrics::from_equity_curve(&bt.values(), 252.0, 0.0).unwrap();
        let report = StrategyReport::assemble(&allocation(), &bt, &metrics);
        assert!(report.post_backtest.is_none());
        assert!(serde_json::to_value(&report).unwrap().get("post_backtest").is_none());

        let report = report.with_post_backtest(&bt, &metrics);
        let post = report.post_backtest.as_ref().unwrap();
        assert_eq!(post.start, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(post.end, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(post.total_return_pct, report.total_return_pct);
        assert_eq!(post.equity_curve.len(), 3);
        assert_eq!(report.warnings.last().unwrap(), "Post-backtest: from backtest");
    }

    #[test]
    fn test_outcome_json_shape() {
        let failed = StrategyOutcome::failed(&FolioError::ConstraintInfeasible("too tight".into()));
        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["kind"], "constraint_infeasible");

        let bt = backtest();
        let metrics = PerformanceMetrics::from_equity_curve(&bt.values(), 252.0, 0.0).unwrap();
        let done = StrategyOutcome::Completed(StrategyReport::assemble(&allocation(), &bt, &metrics));
        let v = serde_json::to_value(&done).unwrap();
        assert_eq!(v["status"], "completed");
        let a: Decimal = v["weights"]["A"].as_str().unwrap().parse().unwrap();
        assert_eq!(a, dec!(60));

        let back: StrategyOutcome = serde_json::from_value(v).unwrap();
        assert_eq!(back, done);
    }
}
