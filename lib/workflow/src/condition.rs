//! Condition evaluation for binary branch nodes.
//!
//! A condition compares one lead field against a configured value. An
//! unconfigured or malformed condition evaluates to `false`, which routes the
//! participant down the "no" branch.

use crate::lead::Lead;
use crate::node::GoalCondition;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Comparison applied by a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// Substring match for text, membership for arrays.
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    IsSet,
    IsNotSet,
    /// The field equals one of the values in the configured list.
    InList,
    NotInList,
    StartsWith,
    EndsWith,
}

impl ConditionOperator {
    /// Returns true if the operator ignores the configured value.
    #[must_use]
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsSet | Self::IsNotSet)
    }
}

/// Configuration of a condition node.
///
/// Every part is optional so half-finished definitions can be saved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<ConditionOperator>,
    #[serde(default)]
    pub value: Option<JsonValue>,
}

impl ConditionConfig {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: JsonValue) -> Self {
        Self {
            field: Some(field.into()),
            operator: Some(operator),
            value: Some(value),
        }
    }

    /// Evaluates the condition against a lead.
    #[must_use]
    pub fn evaluate(&self, lead: &Lead) -> bool {
        let Some(field) = self.field.as_deref().filter(|f| !f.trim().is_empty()) else {
            return false;
        };
        let Some(operator) = self.operator else {
            return false;
        };
        let actual = lead.field(field);
        compare(operator, actual.as_ref(), self.value.as_ref())
    }
}

impl GoalCondition {
    /// Returns true if the lead satisfies the goal.
    #[must_use]
    pub fn is_met(&self, lead: &Lead) -> bool {
        match self {
            Self::TagAdded { tag } => lead.has_tag(tag),
            Self::ScoreAtLeast { score } => lead.score >= *score,
            Self::FieldEquals { field, value } => compare(
                ConditionOperator::Equals,
                lead.field(field).as_ref(),
                Some(value),
            ),
        }
    }
}

/// Applies `operator` to an actual field value and the configured value.
///
/// Returns `false` when the configured value is missing or has the wrong
/// shape for the operator.
#[must_use]
pub fn compare(
    operator: ConditionOperator,
    actual: Option<&JsonValue>,
    expected: Option<&JsonValue>,
) -> bool {
    use ConditionOperator as Op;

    if operator.is_unary() {
        let set = actual.is_some_and(is_set);
        return match operator {
            Op::IsSet => set,
            _ => !set,
        };
    }

    let Some(expected) = expected.filter(|v| !v.is_null()) else {
        return false;
    };

    match operator {
        Op::Equals => actual.is_some_and(|a| loosely_equal(a, expected)),
        Op::NotEquals => !actual.is_some_and(|a| loosely_equal(a, expected)),
        Op::Contains => actual.is_some_and(|a| contains(a, expected)),
        Op::NotContains => !actual.is_some_and(|a| contains(a, expected)),
        Op::GreaterThan => numeric(actual, expected, |a, b| a > b),
        Op::LessThan => numeric(actual, expected, |a, b| a < b),
        Op::GreaterThanOrEqual => numeric(actual, expected, |a, b| a >= b),
        Op::LessThanOrEqual => numeric(actual, expected, |a, b| a <= b),
        Op::InList | Op::NotInList => {
            let JsonValue::Array(list) = expected else {
                return false;
            };
            let found = actual.is_some_and(|a| in_list(a, list));
            if operator == Op::InList { found } else { !found }
        }
        Op::StartsWith => text_pair(actual, expected).is_some_and(|(a, b)| a.starts_with(&b)),
        Op::EndsWith => text_pair(actual, expected).is_some_and(|(a, b)| a.ends_with(&b)),
        Op::IsSet | Op::IsNotSet => false,
    }
}

fn is_set(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn loosely_equal(actual: &JsonValue, expected: &JsonValue) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    matches!((as_text(actual), as_text(expected)), (Some(a), Some(b)) if a == b)
}

fn contains(actual: &JsonValue, expected: &JsonValue) -> bool {
    match actual {
        JsonValue::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        _ => text_pair(Some(actual), expected).is_some_and(|(a, b)| a.contains(&b)),
    }
}

fn in_list(actual: &JsonValue, list: &[JsonValue]) -> bool {
    match actual {
        JsonValue::Array(items) => items
            .iter()
            .any(|item| list.iter().any(|entry| loosely_equal(item, entry))),
        _ => list.iter().any(|entry| loosely_equal(actual, entry)),
    }
}

fn numeric(actual: Option<&JsonValue>, expected: &JsonValue, cmp: fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn text_pair(actual: Option<&JsonValue>, expected: &JsonValue) -> Option<(String, String)> {
    Some((as_text(actual?)?, as_text(expected)?))
}
