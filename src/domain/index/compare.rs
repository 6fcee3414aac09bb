//! Total order over untyped parameter values.

use serde_json::Value as JsonValue;
use std::cmp::Ordering;

fn type_rank(v: &JsonValue) -> u8 {
    match v {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

/// Orders values of different types by type first (null < bool < number <
/// string < array < object), then by value.
pub fn general_cmp(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x.cmp(&y);
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x.cmp(&y);
            }
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match general_cmp(l, r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        // serde_json maps keep keys sorted, so the encoding is canonical.
        (JsonValue::Object(_), JsonValue::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

pub fn general_less_than(a: &JsonValue, b: &JsonValue) -> bool {
    general_cmp(a, b) == Ordering::Less
}

pub fn general_greater_than_equal(a: &JsonValue, b: &JsonValue) -> bool {
    general_cmp(a, b) != Ordering::Less
}

pub fn general_greater_than(a: &JsonValue, b: &JsonValue) -> bool {
    general_cmp(a, b) == Ordering::Greater
}
