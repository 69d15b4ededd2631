pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

const STRATEGIES: [&str; 3] = ["black_litterman", "mvo", "equal_weight"];

/// Columns of the strategy comparison, in display order.
const SUMMARY_FIELDS: [&str; 8] = [
    "sharpe",
    "sortino",
    "calmar",
    "max_drawdown_pct",
    "total_return_pct",
    "annualized_return_pct",
    "annualized_volatility_pct",
    "expected_volatility_pct",
];

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Per-strategy outcome objects when `value` is an analysis envelope.
fn strategy_outcomes(value: &Value) -> Option<Vec<(&'static str, &Map<String, Value>)>> {
    let result = value.get("result")?.as_object()?;
    STRATEGIES
        .iter()
        .map(|name| result.get(*name).and_then(|v| v.as_object()).map(|o| (*name, o)))
        .collect()
}

/// One display row per strategy: name, status, then `SUMMARY_FIELDS`.
fn summary_rows(outcomes: &[(&'static str, &Map<String, Value>)]) -> Vec<Vec<String>> {
    outcomes
        .iter()
        .map(|(name, outcome)| {
            let status = outcome
                .get("status")
                .map(display_value)
                .unwrap_or_default();
            let mut row = vec![name.to_string(), status];
            if outcome.get("status").and_then(|s| s.as_str()) == Some("failed") {
                let kind = outcome.get("kind").map(display_value).unwrap_or_default();
                let message = outcome.get("message").map(display_value).unwrap_or_default();
                row.push(format!("{}: {}", kind, message));
                row.resize(SUMMARY_FIELDS.len() + 2, String::new());
            } else {
                row.extend(
                    SUMMARY_FIELDS
                        .iter()
                        .map(|f| outcome.get(*f).map(display_value).unwrap_or_default()),
                );
            }
            row
        })
        .collect()
}

/// Render a JSON value as plain text. Ratios serialise as
/// `{"value": "1.23"}` or a bare sentinel string.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Object(map) if map.len() == 1 && map.contains_key("value") => {
            display_value(&map["value"])
        }
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(display_value).collect();
            items.join(", ")
        }
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ratio_display() {
        assert_eq!(display_value(&json!({"value": "1.25"})), "1.25");
        assert_eq!(display_value(&json!("undefined")), "undefined");
    }

    #[test]
    fn test_summary_rows_for_failed_strategy() {
        let v = json!({"result": {
            "black_litterman": {"status": "failed", "kind": "constraint_infeasible", "message": "x"},
            "mvo": {"status": "completed", "sharpe": {"value": "0.5"}},
            "equal_weight": {"status": "completed", "sharpe": "undefined"},
        }});
        let outcomes = strategy_outcomes(&v).unwrap();
        let rows = summary_rows(&outcomes);
        assert_eq!(rows[0][2], "constraint_infeasible: x");
        assert_eq!(rows[1][2], "0.5");
        assert_eq!(rows[2][2], "undefined");
        assert!(rows.iter().all(|r| r.len() == SUMMARY_FIELDS.len() + 2));
    }
}
