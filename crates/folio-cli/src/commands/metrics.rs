use clap::Args;
use folio_core::analysis::EngineConfig;
use folio_core::backtest::{self, MetricsInput};
use folio_core::types::ReturnFrequency;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::input;

/// Arguments for equity curve metrics
#[derive(Args)]
pub struct MetricsArgs {
    /// Path to a metrics input JSON (equity_curve, frequency, risk_free_rate_pct)
    #[arg(long)]
    pub input: Option<String>,

    /// Comma-separated equity curve values, oldest first
    #[arg(long, value_delimiter = ',')]
    pub values: Option<Vec<f64>>,

    /// Observation frequency: daily, weekly, monthly, quarterly, annual
    #[arg(long)]
    pub frequency: Option<String>,

    /// Annual risk-free rate in percent (e.g. 4.2)
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate_pct: Option<Decimal>,
}

pub fn run_metrics(args: MetricsArgs, config: &EngineConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let mut metrics_input: MetricsInput = match args.values {
        Some(values) => MetricsInput {
            equity_curve: values,
            frequency: config.frequency,
            risk_free_rate_pct: Decimal::ZERO,
        },
        None => input::stdin::read_input(args.input.as_deref(), "metrics")?,
    };
    if let Some(ref f) = args.frequency {
        metrics_input.frequency = parse_frequency(f)?;
    }
    if let Some(rf) = args.risk_free_rate_pct {
        metrics_input.risk_free_rate_pct = rf;
    }
    let output = backtest::calculate_performance_metrics(&metrics_input)?;
    Ok(serde_json::to_value(output)?)
}

fn parse_frequency(frequency: &str) -> Result<ReturnFrequency, Box<dyn std::error::Error>> {
    match frequency.to_lowercase().as_str() {
        "daily" => Ok(ReturnFrequency::Daily),
        "weekly" => Ok(ReturnFrequency::Weekly),
        "monthly" => Ok(ReturnFrequency::Monthly),
        "quarterly" => Ok(ReturnFrequency::Quarterly),
        "annual" | "annually" => Ok(ReturnFrequency::Annual),
        _ => Err(format!(
            "Unknown frequency '{}'. Use: daily, weekly, monthly, quarterly, annual",
            frequency
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_flag() {
        let args = MetricsArgs {
            input: None,
            values: Some(vec![1.0, 1.1, 0.99]),
            frequency: Some("monthly".into()),
            risk_free_rate_pct: None,
        };
        let v = run_metrics(args, &EngineConfig::default()).unwrap();
        let mdd: Decimal = v["result"]["max_drawdown_pct"].as_str().unwrap().parse().unwrap();
        assert_eq!(mdd, Decimal::new(-10, 0));
    }

    #[test]
    fn test_unknown_frequency() {
        assert!(parse_frequency("hourly").is_err());
    }
}
