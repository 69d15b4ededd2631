use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::FolioError;
use crate::types::{
    fraction_to_pct, pct_to_fraction, with_metadata, ComputationOutput, Ratio, ReturnFrequency,
};
use crate::FolioResult;

/// Below this standard deviation a return series counts as flat.
const ZERO_VARIANCE: f64 = 1e-15;

/// Input for the standalone metrics computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsInput {
    /// Portfolio values, oldest first.
    pub equity_curve: Vec<f64>,
    #[serde(default)]
    pub frequency: ReturnFrequency,
    /// Annual risk-free rate in percent.
    #[serde(default)]
    pub risk_free_rate_pct: Decimal,
}

/// Raw performance statistics of an equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: Ratio,
    pub sortino: Ratio,
    pub calmar: Ratio,
    /// Worst peak-to-trough decline, as a non-positive fraction.
    pub max_drawdown: f64,
    pub periods: usize,
}

/// Performance statistics rounded for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedMetrics {
    pub sharpe: Ratio<Decimal>,
    pub sortino: Ratio<Decimal>,
    pub calmar: Ratio<Decimal>,
    pub max_drawdown_pct: Decimal,
    pub total_return_pct: Decimal,
    pub annualized_return_pct: Decimal,
    pub annualized_volatility_pct: Decimal,
}

impl PerformanceMetrics {
    /// Score an equity curve.
    ///
    /// `risk_free_rate` is annual; it is de-annualised by
    /// `periods_per_year` before computing excess returns.
    pub fn from_equity_curve(
        values: &[f64],
        periods_per_year: f64,
        risk_free_rate: f64,
    ) -> FolioResult<Self> {
        if values.len() < 2 {
            return Err(FolioError::InsufficientHistory(
                "At least 2 equity curve points required".into(),
            ));
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(FolioError::invalid(
                "equity_curve",
                "values must be finite and non-negative",
            ));
        }
        if values[0] <= 0.0 {
            return Err(FolioError::invalid(
                "equity_curve",
                "initial value must be positive",
            ));
        }

        let returns: Vec<f64> = values
            .windows(2)
            .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
            .collect();
        let t = returns.len() as f64;

        let total_return = values[values.len() - 1] / values[0] - 1.0;
        let growth = 1.0 + total_return;
        let annualized_return = if growth <= 0.0 {
            -1.0
        } else {
            growth.powf(periods_per_year / t) - 1.0
        };

        let rf = risk_free_rate / periods_per_year;
        let mean = returns.iter().sum::<f64>() / t;
        let mean_excess = mean - rf;
        let std_dev = sample_std(&returns, mean);
        let annualized_volatility = std_dev * periods_per_year.sqrt();

        let (sharpe, sortino) = if std_dev < ZERO_VARIANCE {
            (Ratio::Undefined, Ratio::Undefined)
        } else {
            let sharpe = Ratio::from_f64(mean_excess / std_dev * periods_per_year.sqrt());
            let dd = downside_deviation(&returns, rf);
            let sortino = if dd > 0.0 {
                Ratio::from_f64(mean_excess / dd * periods_per_year.sqrt())
            } else if mean_excess > 0.0 {
                Ratio::Unbounded
            } else {
                Ratio::Undefined
            };
            (sharpe, sortino)
        };

        let max_dd = max_drawdown(values);
        let calmar = if max_dd == 0.0 {
            Ratio::Undefined
        } else {
            Ratio::from_f64(annualized_return / max_dd.abs())
        };

        Ok(Self {
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe,
            sortino,
            calmar,
            max_drawdown: max_dd,
            periods: returns.len(),
        })
    }

    pub fn reported(&self) -> ReportedMetrics {
        ReportedMetrics {
            sharpe: self.sharpe.to_reported(4),
            sortino: self.sortino.to_reported(4),
            calmar: self.calmar.to_reported(4),
            max_drawdown_pct: fraction_to_pct(self.max_drawdown, 4),
            total_return_pct: fraction_to_pct(self.total_return, 4),
            annualized_return_pct: fraction_to_pct(self.annualized_return, 4),
            annualized_volatility_pct: fraction_to_pct(self.annualized_volatility, 4),
        }
    }
}

/// Score an equity curve, wrapped in the standard envelope.
pub fn calculate_performance_metrics(
    input: &MetricsInput,
) -> FolioResult<ComputationOutput<ReportedMetrics>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let metrics = PerformanceMetrics::from_equity_curve(
        &input.equity_curve,
        input.frequency.periods_per_year(),
        pct_to_fraction(input.risk_free_rate_pct),
    )?;
    if !metrics.sharpe.is_defined() {
        warnings.push("Return series has zero variance; Sharpe undefined".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Equity curve performance (Sharpe, Sortino, Calmar, max drawdown)",
        &serde_json::json!({
            "observations": input.equity_curve.len(),
            "frequency": input.frequency,
            "risk_free_rate_pct": input.risk_free_rate_pct.to_string(),
            "sharpe_stdev": "sample",
            "sortino_downside": "population below risk-free",
        }),
        warnings,
        elapsed,
        metrics.reported(),
    ))
}

/// Sample standard deviation (n-1 denominator)
fn sample_std(data: &[f64], mean: f64) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let sum_sq: f64 = data.iter().map(|x| (x - mean) * (x - mean)).sum();
    (sum_sq / (n - 1) as f64).sqrt()
}

/// Root mean squared shortfall below `target`, over all periods.
fn downside_deviation(returns: &[f64], target: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = returns
        .iter()
        .map(|r| {
            let diff = r - target;
            if diff < 0.0 {
                diff * diff
            } else {
                0.0
            }
        })
        .sum();
    (sum_sq / returns.len() as f64).sqrt()
}

/// Largest relative decline from a running peak, as a value <= 0.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for v in values {
        if *v > peak {
            peak = *v;
        }
        if peak > 0.0 {
            worst = worst.min(v / peak - 1.0);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_max_drawdown() {
        // Peak 1.1, trough 0.8316
        let values = [1.0, 1.1, 0.88, 0.924, 0.8316];
        assert_relative_eq!(max_drawdown(&values), 0.8316 / 1.1 - 1.0, epsilon = 1e-12);
        assert_eq!(max_drawdown(&[1.0, 1.0, 1.2]), 0.0);
    }

    #[test]
    fn test_flat_curve_is_undefined() {
        let m = PerformanceMetrics::from_equity_curve(&[1.0; 40], 252.0, 0.0).unwrap();
        assert_eq!(m.sharpe, Ratio::Undefined);
        assert_eq!(m.sortino, Ratio::Undefined);
        assert_eq!(m.calmar, Ratio::Undefined);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.total_return, 0.0);
    }

    #[test]
    fn test_no_downside_is_unbounded_sortino() {
        let values = [1.0, 1.01, 1.03, 1.04, 1.07];
        let m = PerformanceMetrics::from_equity_curve(&values, 252.0, 0.0).unwrap();
        assert_eq!(m.sortino, Ratio::Unbounded);
        assert!(m.sharpe.value().unwrap() > 0.0);
        assert_eq!(m.calmar, Ratio::Undefined);
    }

    #[test]
    fn test_sharpe_matches_hand_computation() {
        let values = [100.0, 102.0, 99.96, 103.9584];
        let m = PerformanceMetrics::from_equity_curve(&values, 12.0, 0.0).unwrap();
        let r = [0.02, -0.02, 0.04];
        let mean = r.iter().sum::<f64>() / 3.0;
        let sd = (r.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 2.0).sqrt();
        assert_relative_eq!(m.sharpe.value().unwrap(), mean / sd * 12f64.sqrt(), epsilon = 1e-9);

        let dd = (0.0004_f64 / 3.0).sqrt();
        assert_relative_eq!(m.sortino.value().unwrap(), mean / dd * 12f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(m.total_return, 0.039584, epsilon = 1e-9);
        assert_relative_eq!(m.annualized_return, 1.039584f64.powf(4.0) - 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wiped_out_curve() {
        let m = PerformanceMetrics::from_equity_curve(&[1.0, 0.5, 0.0], 252.0, 0.0).unwrap();
        assert_eq!(m.annualized_return, -1.0);
        assert_eq!(m.max_drawdown, -1.0);
    }

    #[test]
    fn test_single_point_rejected() {
        assert!(matches!(
            PerformanceMetrics::from_equity_curve(&[1.0], 252.0, 0.0),
            Err(FolioError::InsufficientHistory(_))
        ));
    }

    #[test]
    fn test_envelope_reports_decimals() {
        let input = MetricsInput {
            equity_curve: vec![1.0, 1.1, 0.99],
            frequency: ReturnFrequency::Monthly,
            risk_free_rate_pct: Decimal::ZERO,
        };
        let out = calculate_performance_metrics(&input).unwrap();
        assert_eq!(out.result.max_drawdown_pct, Decimal::new(-100000, 4));
        assert_eq!(out.result.total_return_pct, Decimal::new(-10000, 4));
    }
}
