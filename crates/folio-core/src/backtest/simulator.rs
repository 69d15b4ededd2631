use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::FolioError;
use crate::market_data::AlignedPrices;
use crate::types::Ticker;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// When drifted weights are reset to the target allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancePolicy {
    /// Buy and hold: weights drift from the initial allocation.
    #[default]
    Static,
    Monthly,
    Quarterly,
    EveryNPeriods(usize),
}

impl RebalancePolicy {
    /// Whether a rebalance happens before applying the return that ends at
    /// `dates[t]`.
    fn is_boundary(&self, prev: NaiveDate, current: NaiveDate, t: usize) -> bool {
        match self {
            RebalancePolicy::Static => false,
            RebalancePolicy::Monthly => {
                (prev.year(), prev.month()) != (current.year(), current.month())
            }
            RebalancePolicy::Quarterly => {
                (prev.year(), prev.month0() / 3) != (current.year(), current.month0() / 3)
            }
            RebalancePolicy::EveryNPeriods(n) => *n > 0 && t > 1 && (t - 1) % n == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub rebalance: RebalancePolicy,
    /// Portfolio value on the first date.
    pub initial_value: f64,
    /// Longest run of missing prices that is forward-filled before an asset
    /// counts as unavailable.
    pub max_fill_gap: usize,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            rebalance: RebalancePolicy::Static,
            initial_value: 1.0,
            max_fill_gap: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub rebalances: usize,
    pub warnings: Vec<String>,
}

impl BacktestResult {
    pub fn values(&self) -> Vec<f64> {
        self.equity_curve.iter().map(|p| p.value).collect()
    }
}

/// Replays a target allocation over aligned prices.
#[derive(Debug, Clone, Default)]
pub struct BacktestSimulator {
    settings: BacktestSettings,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

impl BacktestSimulator {
    pub fn new(settings: BacktestSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BacktestSettings {
        &self.settings
    }

    /// Run `target` (aligned with `prices.tickers`) over `prices`.
    pub fn run(
        &self,
        prices: &AlignedPrices,
        target: &[f64],
        cancel: &CancelToken,
    ) -> FolioResult<BacktestResult> {
        let returns = prices.sparse_returns(self.settings.max_fill_gap);
        self.run_returns(&prices.tickers, &prices.dates, &returns, target, cancel)
    }

    /// Run over per-ticker period returns; `returns[i][t - 1]` is ticker
    /// `i`'s return from `dates[t - 1]` to `dates[t]`, `None` when missing.
    pub fn run_returns(
        &self,
        tickers: &[Ticker],
        dates: &[NaiveDate],
        returns: &[Vec<Option<f64>>],
        target: &[f64],
        cancel: &CancelToken,
    ) -> FolioResult<BacktestResult> {
        let n = tickers.len();
        validate(tickers, dates, returns, target, &self.settings)?;

        let mut weights = target.to_vec();
        let mut value = self.settings.initial_value;
        let mut curve = Vec::with_capacity(dates.len());
        curve.push(EquityPoint {
            date: dates[0],
            value,
        });

        let mut rebalances = 0usize;
        let mut missing: BTreeMap<usize, usize> = BTreeMap::new();
        let mut dark_periods = 0usize;

        for t in 1..dates.len() {
            cancel.check()?;

            if self.settings.rebalance.is_boundary(dates[t - 1], dates[t], t) {
                weights.copy_from_slice(target);
                rebalances += 1;
            }

            let mut held = 0.0;
            let mut gross = 0.0;
            for i in 0..n {
                match returns[i][t - 1] {
                    Some(r) => {
                        held += weights[i];
                        gross += weights[i] * r;
                    }
                    None => {
                        if weights[i] > 0.0 {
                            *missing.entry(i).or_default() += 1;
                        }
                    }
                }
            }

            if held <= 0.0 {
                dark_periods += 1;
                curve.push(EquityPoint {
                    date: dates[t],
                    value,
                });
                continue;
            }

            // Missing assets sit out this period; the rest are renormalized.
            let port_r = gross / held;
            value = (value * (1.0 + port_r)).max(0.0);

            if 1.0 + port_r > 0.0 {
                for i in 0..n {
                    if let Some(r) = returns[i][t - 1] {
                        weights[i] = weights[i] * (1.0 + r) / (1.0 + port_r);
                    }
                }
            }

            curve.push(EquityPoint {
                date: dates[t],
                value,
            });
        }

        let mut warnings = Vec::new();
        for (i, count) in &missing {
            warn!(ticker = %tickers[*i], periods = count, "missing returns during backtest");
            warnings.push(format!(
                "{}: {} period(s) without a return; remaining weights renormalized",
                tickers[*i], count
            ));
        }
        if dark_periods > 0 {
            warnings.push(format!(
                "{} period(s) with no held asset priced; value carried forward",
                dark_periods
            ));
        }

        debug!(
            periods = dates.len() - 1,
            rebalances,
            final_value = value,
            "backtest complete"
        );

        Ok(BacktestResult {
            equity_curve: curve,
            rebalances,
            warnings,
        })
    }
}

fn validate(
    tickers: &[Ticker],
    dates: &[NaiveDate],
    returns: &[Vec<Option<f64>>],
    target: &[f64],
    settings: &BacktestSettings,
) -> FolioResult<()> {
    let n = tickers.len();
    if dates.len() < 2 {
        return Err(FolioError::InsufficientHistory(
            "backtest window needs at least 2 dates".into(),
        ));
    }
    if dates.windows(2).any(|d| d[1] <= d[0]) {
        return Err(FolioError::invalid("dates", "must be strictly ascending"));
    }
    if target.len() != n || returns.len() != n {
        return Err(FolioError::invalid(
            "weights",
            format!("expected {} weights and return rows", n),
        ));
    }
    if returns.iter().any(|row| row.len() != dates.len() - 1) {
        return Err(FolioError::invalid(
            "returns",
            format!("each row needs {} returns", dates.len() - 1),
        ));
    }
    if !(settings.initial_value.is_finite() && settings.initial_value > 0.0) {
        return Err(FolioError::invalid("initial_value", "must be positive"));
    }
    if settings.rebalance == RebalancePolicy::EveryNPeriods(0) {
        return Err(FolioError::invalid("rebalance", "every_n_periods must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|k| start + chrono::Duration::days(k as i64)).collect()
    }

    fn tickers() -> Vec<Ticker> {
        vec!["A".into(), "B".into()]
    }

    #[test]
    fn test_static_buy_and_hold() {
        // A doubles, B flat: value = 0.5 * 2 + 0.5 * 1
        let returns = vec![vec![Some(1.0)], vec![Some(0.0)]];
        let r = BacktestSimulator::default()
            .run_returns(&tickers(), &dates(2), &returns, &[0.5, 0.5], &CancelToken::new())
            .unwrap();
        assert_relative_eq!(r.equity_curve[1].value, 1.5, epsilon = 1e-12);
        assert_eq!(r.equity_curve[0].value, 1.0);
        assert_eq!(r.rebalances, 0);
    }

    #[test]
    fn test_drift_compounds_without_rebalance() {
        let returns = vec![vec![Some(1.0), Some(1.0)], vec![Some(0.0), Some(0.0)]];
        let r = BacktestSimulator::default()
            .run_returns(&tickers(), &dates(3), &returns, &[0.5, 0.5], &CancelToken::new())
            .unwrap();
        // Buy and hold: A grows 4x => 0.5 * 4 + 0.5
        assert_relative_eq!(r.equity_curve[2].value, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_every_period_rebalance_resets_weights() {
        let returns = vec![vec![Some(1.0), Some(1.0)], vec![Some(0.0), Some(0.0)]];
        let sim = BacktestSimulator::new(BacktestSettings {
            rebalance: RebalancePolicy::EveryNPeriods(1),
            ..BacktestSettings::default()
        });
        let r = sim
            .run_returns(&tickers(), &dates(3), &returns, &[0.5, 0.5], &CancelToken::new())
            .unwrap();
        assert_relative_eq!(r.equity_curve[2].value, 2.25, epsilon = 1e-12);
        assert_eq!(r.rebalances, 1);
    }

    #[test]
    fn test_monthly_boundary() {
        let d = vec![
            NaiveDate::from_ymd_opt(2024, 1, 30).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
        ];
        assert!(!RebalancePolicy::Monthly.is_boundary(d[0], d[1], 1));
        assert!(RebalancePolicy::Monthly.is_boundary(d[1], d[2], 2));
        assert!(!RebalancePolicy::Quarterly.is_boundary(d[1], d[2], 2));
        let q = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert!(RebalancePolicy::Quarterly.is_boundary(d[3], q, 3));
    }

    #[test]
    fn test_missing_return_renormalizes() {
        let returns = vec![vec![None], vec![Some(0.10)]];
        let r = BacktestSimulator::default()
            .run_returns(&tickers(), &dates(2), &returns, &[0.5, 0.5], &CancelToken::new())
            .unwrap();
        assert_relative_eq!(r.equity_curve[1].value, 1.10, epsilon = 1e-12);
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].starts_with("A:"));
    }

    #[test]
    fn test_no_prices_carries_value() {
        let returns = vec![vec![None, Some(0.0)], vec![None, Some(0.0)]];
        let r = BacktestSimulator::default()
            .run_returns(&tickers(), &dates(3), &returns, &[0.5, 0.5], &CancelToken::new())
            .unwrap();
        assert_eq!(r.equity_curve[1].value, 1.0);
        assert!(r.warnings.iter().any(|w| w.contains("carried forward")));
    }

    #[test]
    fn test_cancelled_backtest() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let returns = vec![vec![Some(0.0)], vec![Some(0.0)]];
        let err = BacktestSimulator::default()
            .run_returns(&tickers(), &dates(2), &returns, &[0.5, 0.5], &cancel)
            .unwrap_err();
        assert!(matches!(err, FolioError::Cancelled));
    }

    #[test]
    fn test_initial_value_respected() {
        let sim = BacktestSimulator::new(BacktestSettings {
            initial_value: 10_000.0,
            ..BacktestSettings::default()
        });
        let returns = vec![vec![Some(0.01)], vec![Some(0.01)]];
        let r = sim
            .run_returns(&tickers(), &dates(2), &returns, &[0.5, 0.5], &CancelToken::new())
            .unwrap();
        assert_relative_eq!(r.equity_curve[1].value, 10_100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rebalance_serde_shape() {
        let p: RebalancePolicy = serde_json::from_str(r#"{"every_n_periods": 21}"#).unwrap();
        assert_eq!(p, RebalancePolicy::EveryNPeriods(21));
        let p: RebalancePolicy = serde_json::from_str(r#""quarterly""#).unwrap();
        assert_eq!(p, RebalancePolicy::Quarterly);
    }
}
