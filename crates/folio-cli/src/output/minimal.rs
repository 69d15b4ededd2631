use serde_json::Value;

use super::{display_value, strategy_outcomes};

/// Print just the key answer: one Sharpe line per strategy for an
/// analysis, otherwise the first well-known field of the result.
pub fn print_minimal(value: &Value) {
    if let Some(outcomes) = strategy_outcomes(value) {
        for (name, outcome) in outcomes {
            let answer = match outcome.get("sharpe") {
                Some(sharpe) => display_value(sharpe),
                None => outcome.get("kind").map(display_value).unwrap_or_default(),
            };
            println!("{}: {}", name, answer);
        }
        return;
    }

    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let priority_keys = ["sharpe", "weights", "expected_returns", "max_drawdown_pct"];

    if let Value::Object(map) = result_obj {
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", display_value(val));
                    return;
                }
            }
        }
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, display_value(val));
            return;
        }
    }
    println!("{}", display_value(result_obj));
}
