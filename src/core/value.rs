use serde_json::Value;
use std::cmp::Ordering;

/// Orders two JSON scalars the way the remote store compares column values.
///
/// Numbers compare numerically, strings lexically (ISO-8601 timestamps sort
/// correctly this way), booleans `false < true`. Mixed or compound types are
/// incomparable and yield `None`.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Equality used by filters: numbers are compared by value so `1` matches `1.0`.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

/// Renders a scalar as it appears in a PostgREST filter (`eq.true`, `eq.abc`).
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_compare_lexically() {
        let older = json!("2024-01-01T00:00:00Z");
        let newer = json!("2024-02-01T00:00:00Z");
        assert_eq!(compare_values(&older, &newer), Some(Ordering::Less));
    }

    #[test]
    fn mixed_types_are_incomparable() {
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert!(values_equal(&json!(1), &json!(1.0)));
    }

    #[test]
    fn scalar_rendering_drops_string_quotes() {
        assert_eq!(render_scalar(&json!("T1")), "T1");
        assert_eq!(render_scalar(&json!(true)), "true");
    }
}
