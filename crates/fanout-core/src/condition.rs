//! Filter condition evaluation against event payloads.
//!
//! A condition is a small predicate over one payload field, addressed by
//! dot-notation (`data.plan`). Action rules and subscription filters both
//! carry lists of conditions which are AND-ed together.
//!
//! Missing-field semantics: `exists` evaluates false, `not_exists` evaluates
//! true, every other operator evaluates false. Evaluation never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Field equals the expected value.
    Equals,
    /// String substring or array membership of the expected value.
    Contains,
    /// Numeric greater-than.
    Gt,
    /// Numeric less-than.
    Lt,
    /// Field value is a member of the expected list.
    In,
    /// Field value is not a member of the expected list.
    NotIn,
    /// Field is present (any value, including null).
    Exists,
    /// Field is absent.
    NotExists,
}

/// One predicate over an event payload field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-notation path into the payload, e.g. `data.plan`.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Expected value; ignored for `exists`/`not_exists`.
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    /// Evaluate this condition against a payload document.
    #[must_use]
    pub fn evaluate(&self, payload: &Value) -> bool {
        let field_value = lookup_path(payload, &self.field);

        match self.operator {
            ConditionOperator::Exists => field_value.is_some(),
            ConditionOperator::NotExists => field_value.is_none(),
            _ => {
                let Some(actual) = field_value else {
                    return false;
                };
                self.compare(actual)
            }
        }
    }

    fn compare(&self, actual: &Value) -> bool {
        match self.operator {
            ConditionOperator::Equals => actual == &self.value,
            ConditionOperator::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            ConditionOperator::Gt => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOperator::Lt => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            ConditionOperator::In => match &self.value {
                Value::Array(allowed) => allowed.contains(actual),
                _ => false,
            },
            ConditionOperator::NotIn => match &self.value {
                Value::Array(denied) => !denied.contains(actual),
                _ => false,
            },
            ConditionOperator::Exists | ConditionOperator::NotExists => unreachable!(),
        }
    }
}

/// Evaluate a list of conditions, AND-ed. An empty list matches everything.
#[must_use]
pub fn evaluate_all(conditions: &[Condition], payload: &Value) -> bool {
    conditions.iter().all(|c| c.evaluate(payload))
}

/// Resolve a dot-notation path inside a JSON document.
///
/// Returns `None` if any segment is missing or a non-object is traversed.
#[must_use]
pub fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_lookup_path() {
        let payload = json!({"data": {"plan": "pro", "seats": 5}});
        assert_eq!(lookup_path(&payload, "data.plan"), Some(&json!("pro")));
        assert_eq!(lookup_path(&payload, "data.seats"), Some(&json!(5)));
        assert_eq!(lookup_path(&payload, "data.missing"), None);
        assert_eq!(lookup_path(&payload, "data.plan.deeper"), None);
    }

    #[test]
    fn test_equals() {
        let payload = json!({"data": {"plan": "pro"}});
        assert!(cond("data.plan", ConditionOperator::Equals, json!("pro")).evaluate(&payload));
        assert!(!cond("data.plan", ConditionOperator::Equals, json!("free")).evaluate(&payload));
    }

    #[test]
    fn test_contains_substring() {
        let payload = json!({"data": {"email": "alice@example.com"}});
        assert!(
            cond("data.email", ConditionOperator::Contains, json!("@example"))
                .evaluate(&payload)
        );
        assert!(
            !cond("data.email", ConditionOperator::Contains, json!("@other")).evaluate(&payload)
        );
    }

    #[test]
    fn test_contains_array_membership() {
        let payload = json!({"data": {"tags": ["beta", "internal"]}});
        assert!(cond("data.tags", ConditionOperator::Contains, json!("beta")).evaluate(&payload));
        assert!(!cond("data.tags", ConditionOperator::Contains, json!("ga")).evaluate(&payload));
    }

    #[test]
    fn test_numeric_comparisons() {
        let payload = json!({"data": {"seats": 10}});
        assert!(cond("data.seats", ConditionOperator::Gt, json!(5)).evaluate(&payload));
        assert!(!cond("data.seats", ConditionOperator::Gt, json!(10)).evaluate(&payload));
        assert!(cond("data.seats", ConditionOperator::Lt, json!(11)).evaluate(&payload));
        assert!(!cond("data.seats", ConditionOperator::Lt, json!(3)).evaluate(&payload));
    }

    #[test]
    fn test_numeric_against_non_numeric_is_false() {
        let payload = json!({"data": {"seats": "ten"}});
        assert!(!cond("data.seats", ConditionOperator::Gt, json!(5)).evaluate(&payload));
    }

    #[test]
    fn test_in_membership() {
        let payload = json!({"data": {"plan": "pro"}});
        let allowed = json!(["pro", "enterprise"]);
        assert!(cond("data.plan", ConditionOperator::In, allowed.clone()).evaluate(&payload));

        let free = json!({"data": {"plan": "free"}});
        assert!(!cond("data.plan", ConditionOperator::In, allowed).evaluate(&free));
    }

    #[test]
    fn test_not_in_membership() {
        let payload = json!({"data": {"plan": "free"}});
        let denied = json!(["pro", "enterprise"]);
        assert!(cond("data.plan", ConditionOperator::NotIn, denied.clone()).evaluate(&payload));

        let pro = json!({"data": {"plan": "pro"}});
        assert!(!cond("data.plan", ConditionOperator::NotIn, denied).evaluate(&pro));
    }

    #[test]
    fn test_exists_and_not_exists() {
        let payload = json!({"data": {"plan": "pro", "note": null}});
        assert!(cond("data.plan", ConditionOperator::Exists, Value::Null).evaluate(&payload));
        // Present-but-null still exists.
        assert!(cond("data.note", ConditionOperator::Exists, Value::Null).evaluate(&payload));
        assert!(!cond("data.missing", ConditionOperator::Exists, Value::Null).evaluate(&payload));
        assert!(
            cond("data.missing", ConditionOperator::NotExists, Value::Null).evaluate(&payload)
        );
        assert!(!cond("data.plan", ConditionOperator::NotExists, Value::Null).evaluate(&payload));
    }

    #[test]
    fn test_missing_field_is_false_for_value_operators() {
        let payload = json!({"data": {}});
        for op in [
            ConditionOperator::Equals,
            ConditionOperator::Contains,
            ConditionOperator::Gt,
            ConditionOperator::Lt,
            ConditionOperator::In,
            ConditionOperator::NotIn,
        ] {
            assert!(
                !cond("data.plan", op, json!(["pro"])).evaluate(&payload),
                "{op:?} on a missing field must evaluate false"
            );
        }
    }

    #[test]
    fn test_evaluate_all_is_and() {
        let payload = json!({"data": {"plan": "pro", "seats": 10}});
        let conditions = vec![
            cond("data.plan", ConditionOperator::Equals, json!("pro")),
            cond("data.seats", ConditionOperator::Gt, json!(5)),
        ];
        assert!(evaluate_all(&conditions, &payload));

        let failing = vec![
            cond("data.plan", ConditionOperator::Equals, json!("pro")),
            cond("data.seats", ConditionOperator::Gt, json!(50)),
        ];
        assert!(!evaluate_all(&failing, &payload));
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        assert!(evaluate_all(&[], &json!({})));
    }

    #[test]
    fn test_operator_serde_round_trip() {
        let c: Condition = serde_json::from_value(json!({
            "field": "data.plan",
            "operator": "not_in",
            "value": ["free"]
        }))
        .unwrap();
        assert_eq!(c.operator, ConditionOperator::NotIn);

        let back = serde_json::to_value(&c).unwrap();
        assert_eq!(back["operator"], "not_in");
    }
}
