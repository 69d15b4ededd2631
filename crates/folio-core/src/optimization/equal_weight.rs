use std::collections::BTreeSet;

use super::allocation::{Allocation, Strategy};
use crate::error::FolioError;
use crate::linalg::{dot, quad_form};
use crate::types::Ticker;
use crate::FolioResult;

/// Uniform `1/N` allocation. Weight bounds do not apply to the baseline.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeightBaseline;

impl EqualWeightBaseline {
    pub fn new() -> Self {
        Self
    }

    pub fn allocate(
        &self,
        tickers: &[Ticker],
        mu: Option<&[f64]>,
        cov: Option<&[Vec<f64>]>,
    ) -> FolioResult<Allocation> {
        let n = tickers.len();
        if n < 2 {
            return Err(FolioError::InvalidUniverse(format!(
                "equal weight needs at least 2 tickers, got {}",
                n
            )));
        }
        let unique: BTreeSet<&Ticker> = tickers.iter().collect();
        if unique.len() != n {
            return Err(FolioError::InvalidUniverse("duplicate ticker".into()));
        }

        let weights = vec![1.0 / n as f64; n];
        Ok(Allocation {
            strategy: Strategy::EqualWeight,
            tickers: tickers.to_vec(),
            expected_return: mu.map(|m| dot(&weights, m)),
            expected_volatility: cov.map(|c| quad_form(&weights, c).max(0.0).sqrt()),
            weights,
            degraded: false,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_three_assets_one_third_each() {
        let tickers: Vec<Ticker> = vec!["A".into(), "B".into(), "C".into()];
        let a = EqualWeightBaseline::new().allocate(&tickers, None, None).unwrap();
        for w in &a.weights {
            assert_relative_eq!(*w, 1.0 / 3.0, epsilon = 1e-9);
        }
        assert!(a.is_fully_invested());
        assert_eq!(a.strategy, Strategy::EqualWeight);
    }

    #[test]
    fn test_single_ticker_rejected() {
        let err = EqualWeightBaseline::new()
            .allocate(&["A".into()], None, None)
            .unwrap_err();
        assert!(matches!(err, FolioError::InvalidUniverse(_)));
    }

    #[test]
    fn test_reports_moments_when_given() {
        let cov = vec![vec![0.04, 0.0], vec![0.0, 0.04]];
        let a = EqualWeightBaseline::new()
            .allocate(&["A".into(), "B".into()], Some(&[0.1, 0.05]), Some(&cov))
            .unwrap();
        assert_relative_eq!(a.expected_return.unwrap(), 0.075, epsilon = 1e-12);
        assert_relative_eq!(a.expected_volatility.unwrap(), 0.02f64.sqrt(), epsilon = 1e-12);
    }
}
