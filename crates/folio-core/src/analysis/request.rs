use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::backtest::RebalancePolicy;
use crate::error::FolioError;
use crate::optimization::Objective;
use crate::prediction::ModelKind;
use crate::types::Ticker;
use crate::FolioResult;

const MAX_TICKER_LEN: usize = 15;

/// A portfolio analysis request. Percent fields use 10 = 10%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub tickers: Vec<Ticker>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub ml_model: ModelKind,
    pub target_volatility_pct: Decimal,
    pub min_weight_pct: Decimal,
    pub max_weight_pct: Decimal,

    /// First backtest date; moments and views use only earlier prices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_start: Option<NaiveDate>,
    /// Last backtest date; defaults to `end_date`. Requires `backtest_start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_end: Option<NaiveDate>,
    /// End of the forward period after `backtest_end` over which the weights
    /// are held unchanged and scored a second time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backtest_end: Option<NaiveDate>,
    /// Market-capitalisation weights in percent for the equilibrium prior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_weights: Option<BTreeMap<Ticker, Decimal>>,
    /// Benchmark ticker used to derive market risk aversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_proxy: Option<Ticker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<Objective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_return_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebalance: Option<RebalancePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_free_rate_pct: Option<Decimal>,
}

impl AnalysisRequest {
    /// Request with only the required fields set.
    pub fn new(
        tickers: Vec<Ticker>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        ml_model: ModelKind,
        target_volatility_pct: Decimal,
        min_weight_pct: Decimal,
        max_weight_pct: Decimal,
    ) -> Self {
        Self {
            tickers,
            start_date,
            end_date,
            ml_model,
            target_volatility_pct,
            min_weight_pct,
            max_weight_pct,
            backtest_start: None,
            backtest_end: None,
            post_backtest_end: None,
            market_weights: None,
            market_proxy: None,
            objective: None,
            target_return_pct: None,
            rebalance: None,
            risk_free_rate_pct: None,
        }
    }

    /// Reject anything malformed before any data is fetched.
    pub fn validate(&self) -> FolioResult<()> {
        validate_universe(&self.tickers)?;

        if self.start_date >= self.end_date {
            return Err(FolioError::invalid(
                "start_date",
                format!(
                    "start date {} must precede end date {}",
                    self.start_date, self.end_date
                ),
            ));
        }
        check_range("target_volatility_pct", self.target_volatility_pct, dec!(5), dec!(30))?;
        check_range("min_weight_pct", self.min_weight_pct, dec!(0), dec!(20))?;
        check_range("max_weight_pct", self.max_weight_pct, dec!(20), dec!(100))?;

        self.validate_windows()?;

        if let Some(ref weights) = self.market_weights {
            let mut total = Decimal::ZERO;
            for (ticker, w) in weights {
                if !self.tickers.contains(ticker) {
                    return Err(FolioError::invalid(
                        "market_weights",
                        format!("{} is not in the universe", ticker),
                    ));
                }
                if *w < Decimal::ZERO {
                    return Err(FolioError::invalid(
                        "market_weights",
                        format!("{} has negative weight {}", ticker, w),
                    ));
                }
                total += *w;
            }
            if total.is_zero() {
                return Err(FolioError::invalid("market_weights", "weights sum to zero"));
            }
        }

        if let Some(ref proxy) = self.market_proxy {
            if !is_well_formed(proxy) {
                return Err(FolioError::invalid(
                    "market_proxy",
                    format!("malformed ticker {:?}", proxy),
                ));
            }
        }

        if self.objective == Some(Objective::TargetReturn) && self.target_return_pct.is_none() {
            return Err(FolioError::invalid(
                "target_return_pct",
                "required for the target_return objective",
            ));
        }
        if let Some(rf) = self.risk_free_rate_pct {
            check_range("risk_free_rate_pct", rf, dec!(-100), dec!(100))?;
        }
        if self.rebalance == Some(RebalancePolicy::EveryNPeriods(0)) {
            return Err(FolioError::invalid(
                "rebalance",
                "every_n_periods must be at least 1",
            ));
        }
        Ok(())
    }

    /// `start_date < backtest_start < backtest_end < post_backtest_end <= end_date`,
    /// each later date only allowed when the earlier one is given.
    fn validate_windows(&self) -> FolioResult<()> {
        let bs = match self.backtest_start {
            Some(bs) => bs,
            None if self.backtest_end.is_some() => {
                return Err(FolioError::invalid("backtest_end", "requires backtest_start"));
            }
            None => return Ok(()),
        };
        if bs <= self.start_date || bs >= self.end_date {
            return Err(FolioError::invalid(
                "backtest_start",
                format!(
                    "{} must fall strictly between {} and {}",
                    bs, self.start_date, self.end_date
                ),
            ));
        }

        let be = match self.backtest_end {
            Some(be) => be,
            None if self.post_backtest_end.is_some() => {
                return Err(FolioError::invalid("post_backtest_end", "requires backtest_end"));
            }
            None => return Ok(()),
        };
        if be <= bs || be > self.end_date {
            return Err(FolioError::invalid(
                "backtest_end",
                format!("{} must fall after {} and no later than {}", be, bs, self.end_date),
            ));
        }

        if let Some(pbe) = self.post_backtest_end {
            if pbe <= be || pbe > self.end_date {
                return Err(FolioError::invalid(
                    "post_backtest_end",
                    format!("{} must fall after {} and no later than {}", pbe, be, self.end_date),
                ));
            }
        }
        Ok(())
    }

    /// Last date of the backtest window.
    pub fn effective_backtest_end(&self) -> NaiveDate {
        self.backtest_end.unwrap_or(self.end_date)
    }

    pub fn objective(&self) -> Objective {
        self.objective.unwrap_or_default()
    }
}

/// At least two unique, well-formed symbols.
pub fn validate_universe(tickers: &[Ticker]) -> FolioResult<()> {
    if tickers.len() < 2 {
        return Err(FolioError::InvalidUniverse(format!(
            "at least 2 tickers required, got {}",
            tickers.len()
        )));
    }
    let mut seen = BTreeSet::new();
    for t in tickers {
        if !is_well_formed(t) {
            return Err(FolioError::InvalidUniverse(format!("malformed ticker {:?}", t)));
        }
        if !seen.insert(t.as_str()) {
            return Err(FolioError::InvalidUniverse(format!("duplicate ticker {}", t)));
        }
    }
    Ok(())
}

fn is_well_formed(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker.len() <= MAX_TICKER_LEN
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '_'))
}

fn check_range(field: &str, value: Decimal, lo: Decimal, hi: Decimal) -> FolioResult<()> {
    if value < lo || value > hi {
        return Err(FolioError::invalid(
            field,
            format!("{} outside [{}, {}]", value, lo, hi),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(
            vec!["AAPL".into(), "MSFT".into(), "BRK.B".into()],
            d(2023, 1, 1),
            d(2024, 1, 1),
            ModelKind::Xgboost,
            dec!(15),
            dec!(0),
            dec!(40),
        )
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_universe_rules() {
        let mut r = request();
        r.tickers = vec!["AAPL".into()];
        assert!(matches!(r.validate(), Err(FolioError::InvalidUniverse(_))));
        r.tickers = vec!["AAPL".into(), "AAPL".into()];
        assert!(matches!(r.validate(), Err(FolioError::InvalidUniverse(_))));
        r.tickers = vec!["AAPL".into(), "bad ticker".into()];
        assert!(matches!(r.validate(), Err(FolioError::InvalidUniverse(_))));
    }

    #[test]
    fn test_field_ranges() {
        let mut r = request();
        r.target_volatility_pct = dec!(35);
        assert!(matches!(r.validate(), Err(FolioError::InvalidInput { .. })));

        let mut r = request();
        r.max_weight_pct = dec!(15);
        assert!(r.validate().is_err());

        let mut r = request();
        r.end_date = r.start_date;
        assert!(r.validate().is_err());

        let mut r = request();
        r.backtest_start = Some(d(2024, 6, 1));
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_window_ordering() {
        let mut r = request();
        r.backtest_start = Some(d(2023, 7, 1));
        r.backtest_end = Some(d(2023, 10, 1));
        r.post_backtest_end = Some(d(2024, 1, 1));
        assert!(r.validate().is_ok());
        assert_eq!(r.effective_backtest_end(), d(2023, 10, 1));

        let mut bad = r.clone();
        bad.backtest_end = Some(d(2023, 7, 1));
        assert!(matches!(
            bad.validate(),
            Err(FolioError::InvalidInput { ref field, .. }) if field == "backtest_end"
        ));

        let mut bad = r.clone();
        bad.post_backtest_end = Some(d(2023, 9, 1));
        assert!(bad.validate().is_err());

        let mut bad = r.clone();
        bad.post_backtest_end = Some(d(2024, 2, 1));
        assert!(bad.validate().is_err());

        let mut bad = r.clone();
        bad.backtest_start = None;
        assert!(bad.validate().is_err());

        let mut bad = r;
        bad.backtest_end = None;
        assert!(matches!(
            bad.validate(),
            Err(FolioError::InvalidInput { ref field, .. }) if field == "post_backtest_end"
        ));
    }

    #[test]
    fn test_backtest_end_defaults_to_end_date() {
        let mut r = request();
        r.backtest_start = Some(d(2023, 7, 1));
        assert_eq!(r.effective_backtest_end(), r.end_date);
        r.backtest_end = Some(d(2024, 1, 1));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_target_return_objective_needs_target() {
        let mut r = request();
        r.objective = Some(Objective::TargetReturn);
        assert!(r.validate().is_err());
        r.target_return_pct = Some(dec!(8));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_minimal_json_shape() {
        let json = r#"{
            "tickers": ["AAPL", "MSFT"],
            "start_date": "2023-01-01",
            "end_date": "2024-01-01",
            "ml_model": "random_forest",
            "target_volatility_pct": "15",
            "min_weight_pct": "5",
            "max_weight_pct": "60"
        }"#;
        let r: AnalysisRequest = serde_json::from_str(json).unwrap();
        assert_eq!(r.ml_model, ModelKind::RandomForest);
        assert_eq!(r.objective(), Objective::MaxSharpe);
        assert!(r.validate().is_ok());
    }
}
