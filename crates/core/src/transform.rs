//! In-memory transforms over already-retrieved record sets. These back the
//! `filter_data` / `aggregate_data` capabilities and never touch a backend.

use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Count,
    Avg,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unsupported aggregate operation `{0}` (expected sum|count|avg)")]
pub struct UnknownAggregateOp(pub String);

impl FromStr for AggregateOp {
    type Err = UnknownAggregateOp;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "avg" => Ok(Self::Avg),
            other => Err(UnknownAggregateOp(other.to_string())),
        }
    }
}

/// Keeps the records whose `field` matches `needle`. String-to-string
/// comparison is case-insensitive and bidirectional-substring ("Meta" matches
/// "Meta Platforms Inc" and vice versa); any other type pair compares by
/// equality. Entries that are not objects are skipped.
pub fn filter_records(records: &[Value], field: &str, needle: &Value) -> Vec<Value> {
    records
        .iter()
        .filter_map(Value::as_object)
        .filter(|record| match (record.get(field), needle) {
            (Some(Value::String(value)), Value::String(wanted)) => {
                let value = value.to_lowercase();
                let wanted = wanted.to_lowercase();
                value.contains(&wanted) || wanted.contains(&value)
            }
            (Some(value), wanted) => value == wanted,
            (None, _) => false,
        })
        .map(|record| Value::Object(record.clone()))
        .collect()
}

/// Numeric aggregation over a named field. `count` ignores the field and
/// counts entries; `sum`/`avg` coerce numeric-looking strings (accepting a
/// comma decimal separator) and silently skip values that do not coerce.
pub fn aggregate_records(records: &[Value], op: AggregateOp, field: &str) -> f64 {
    if op == AggregateOp::Count {
        return records.len() as f64;
    }

    let values: Vec<f64> = records
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|record| record.get(field))
        .filter_map(coerce_numeric)
        .collect();

    if values.is_empty() {
        return 0.0;
    }

    let sum: f64 = values.iter().sum();
    match op {
        AggregateOp::Sum => sum,
        AggregateOp::Avg => sum / values.len() as f64,
        AggregateOp::Count => unreachable!("handled above"),
    }
}

/// Lenient numeric coercion shared by the aggregation capability and the
/// evidence summarizer: JSON numbers, or strings with `.` or `,` decimals.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}
