use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::{display_value, strategy_outcomes, summary_rows, SUMMARY_FIELDS};

/// Format output as a table using the tabled crate.
pub fn print_table(value: &Value) {
    if let Some(outcomes) = strategy_outcomes(value) {
        let mut builder = Builder::default();
        let mut header = vec!["strategy".to_string(), "status".to_string()];
        header.extend(SUMMARY_FIELDS.iter().map(|f| f.to_string()));
        builder.push_record(header);
        for row in summary_rows(&outcomes) {
            builder.push_record(row);
        }
        println!("{}", Table::from(builder));
        print_weights(&outcomes);
    } else if let Some(Value::Object(result)) = value.get("result") {
        print_fields(result);
    } else if let Value::Object(map) = value {
        print_fields(map);
    } else {
        println!("{}", value);
    }

    if let Some(Value::Array(warnings)) = value.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(|w| w.as_str()) {
                println!("  - {}", w);
            }
        }
    }
    if let Some(Value::String(meth)) = value.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

/// Ticker by strategy weight matrix for completed strategies.
fn print_weights(outcomes: &[(&'static str, &serde_json::Map<String, Value>)]) {
    let completed: Vec<_> = outcomes
        .iter()
        .filter_map(|(name, o)| o.get("weights").and_then(|w| w.as_object()).map(|w| (*name, w)))
        .collect();
    let Some((_, first)) = completed.first() else {
        return;
    };

    let mut builder = Builder::default();
    let mut header = vec!["ticker".to_string()];
    header.extend(completed.iter().map(|(name, _)| format!("{} %", name)));
    builder.push_record(header);
    for ticker in first.keys() {
        let mut row = vec![ticker.clone()];
        row.extend(
            completed
                .iter()
                .map(|(_, w)| w.get(ticker).map(display_value).unwrap_or_default()),
        );
        builder.push_record(row);
    }
    println!("\n{}", Table::from(builder));
}

fn print_fields(map: &serde_json::Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.clone(), display_value(val)]);
    }
    println!("{}", Table::from(builder));
}
