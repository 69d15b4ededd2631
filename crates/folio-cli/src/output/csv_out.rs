use serde_json::Value;
use std::io;

use super::{display_value, strategy_outcomes, summary_rows, SUMMARY_FIELDS};

/// Write output as CSV to stdout.
///
/// Analyses become one row per strategy; any other envelope becomes a
/// two-column `field,value` listing of its result.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    if let Some(outcomes) = strategy_outcomes(value) {
        let mut header = vec!["strategy", "status"];
        header.extend(SUMMARY_FIELDS.iter());
        let _ = wtr.write_record(&header);
        for row in summary_rows(&outcomes) {
            let _ = wtr.write_record(&row);
        }
    } else {
        let fields = match value.get("result") {
            Some(Value::Object(result)) => Some(result),
            _ => value.as_object(),
        };
        match fields {
            Some(map) => {
                let _ = wtr.write_record(["field", "value"]);
                for (key, val) in map {
                    let _ = wtr.write_record([key.as_str(), &csv_value(val)]);
                }
            }
            None => {
                let _ = wtr.write_record([&csv_value(value)]);
            }
        }
    }

    let _ = wtr.flush();
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => display_value(other),
    }
}
