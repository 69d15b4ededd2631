use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Ticker symbol.
pub type Ticker = String;

/// Frequency of price observations, used for annualisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl ReturnFrequency {
    /// Number of periods in a year for annualisation
    pub fn periods_per_year(&self) -> f64 {
        match self {
            ReturnFrequency::Daily => 252.0,
            ReturnFrequency::Weekly => 52.0,
            ReturnFrequency::Monthly => 12.0,
            ReturnFrequency::Quarterly => 4.0,
            ReturnFrequency::Annual => 1.0,
        }
    }
}

/// A risk-adjusted ratio that may not be computable.
///
/// `Unbounded` marks a ratio whose risk denominator is zero while the
/// numerator is positive (e.g. Sortino with no downside periods).
/// `Undefined` marks 0/0 style cases (flat series, zero drawdown).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ratio<T = f64> {
    Value(T),
    Unbounded,
    Undefined,
}

impl Ratio<f64> {
    /// Wrap a float, mapping NaN and infinities onto the sentinels.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            Ratio::Undefined
        } else if value.is_infinite() {
            Ratio::Unbounded
        } else {
            Ratio::Value(value)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Ratio::Value(_))
    }

    /// Convert to the reported decimal form.
    pub fn to_reported(&self, dp: u32) -> Ratio<Decimal> {
        match self {
            Ratio::Value(v) => match Decimal::from_f64(*v) {
                Some(d) => Ratio::Value(d.round_dp(dp)),
                None => Ratio::Undefined,
            },
            Ratio::Unbounded => Ratio::Unbounded,
            Ratio::Undefined => Ratio::Undefined,
        }
    }
}

/// Round a float into a reported decimal. Non-finite input maps to zero.
pub fn to_decimal(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(dp))
        .unwrap_or(Decimal::ZERO)
}

/// Float value of a fraction expressed as a decimal percentage.
pub fn pct_to_fraction(pct: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    (pct / dec!(100)).to_f64().unwrap_or(0.0)
}

/// Decimal percentage of a float fraction, rounded to `dp` places.
pub fn fraction_to_pct(fraction: f64, dp: u32) -> Decimal {
    to_decimal(fraction * 100.0, dp)
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_sentinels() {
        assert_eq!(Ratio::from_f64(f64::NAN), Ratio::Undefined);
        assert_eq!(Ratio::from_f64(f64::INFINITY), Ratio::Unbounded);
        assert_eq!(Ratio::from_f64(1.5).value(), Some(1.5));
    }

    #[test]
    fn test_ratio_serde_shape() {
        let v = serde_json::to_value(Ratio::<Decimal>::Undefined).unwrap();
        assert_eq!(v, serde_json::json!("undefined"));
        let v = serde_json::to_value(Ratio::Value(dec!(1.25))).unwrap();
        assert_eq!(v, serde_json::json!({ "value": "1.25" }));
    }

    #[test]
    fn test_pct_conversions() {
        assert!((pct_to_fraction(dec!(15)) - 0.15).abs() < 1e-15);
        assert_eq!(fraction_to_pct(0.123456, 2), dec!(12.35));
        assert_eq!(to_decimal(f64::NAN, 4), Decimal::ZERO);
    }
}
