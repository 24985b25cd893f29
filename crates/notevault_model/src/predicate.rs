//! Item predicates.
//!
//! Predicates are evaluated against a JSON projection of an item (see
//! [`Item::predicate_projection`](crate::Item::predicate_projection)). The
//! serialized shape `{"keypath", "operator", "value"}` matches what smart
//! tags store in their content.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Equal.
    #[serde(rename = "=")]
    Equal,
    /// Not equal. A missing value is not equal to anything.
    #[serde(rename = "!=")]
    NotEqual,
    /// Less than.
    #[serde(rename = "<")]
    LessThan,
    /// Greater than.
    #[serde(rename = ">")]
    GreaterThan,
    /// Less than or equal.
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// String prefix.
    #[serde(rename = "startsWith")]
    StartsWith,
    /// Value is one of the given array's elements.
    #[serde(rename = "in")]
    In,
    /// Array value contains the given element, or string contains substring.
    #[serde(rename = "includes")]
    Includes,
}

/// Boolean combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompoundOperator {
    /// All sub-predicates hold.
    And,
    /// Any sub-predicate holds.
    Or,
    /// The single sub-predicate does not hold.
    Not,
}

/// A predicate over items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    /// Combination of sub-predicates.
    Compound {
        /// Combinator.
        operator: CompoundOperator,
        /// Operands.
        value: Vec<Predicate>,
    },
    /// Key-path comparison.
    Comparison {
        /// Dotted path into the item projection.
        keypath: String,
        /// Operator.
        operator: ComparisonOperator,
        /// Right-hand side.
        value: Value,
    },
}

impl Predicate {
    /// Creates a comparison predicate.
    pub fn new(keypath: impl Into<String>, operator: ComparisonOperator, value: Value) -> Self {
        Predicate::Comparison {
            keypath: keypath.into(),
            operator,
            value,
        }
    }

    /// All of `predicates`.
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::Compound {
            operator: CompoundOperator::And,
            value: predicates,
        }
    }

    /// Any of `predicates`.
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Compound {
            operator: CompoundOperator::Or,
            value: predicates,
        }
    }

    /// Negation of `predicate`.
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Compound {
            operator: CompoundOperator::Not,
            value: vec![predicate],
        }
    }

    /// Evaluates against a projection object.
    pub fn evaluate(&self, projection: &Value) -> bool {
        match self {
            Predicate::Compound { operator, value } => match operator {
                CompoundOperator::And => value.iter().all(|p| p.evaluate(projection)),
                CompoundOperator::Or => value.iter().any(|p| p.evaluate(projection)),
                CompoundOperator::Not => value.first().is_some_and(|p| !p.evaluate(projection)),
            },
            Predicate::Comparison {
                keypath,
                operator,
                value,
            } => compare(lookup(projection, keypath), *operator, value),
        }
    }
}

fn lookup<'a>(projection: &'a Value, keypath: &str) -> Option<&'a Value> {
    if let Some(direct) = projection.get(keypath) {
        return Some(direct);
    }
    let mut current = projection;
    for segment in keypath.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, operator: ComparisonOperator, expected: &Value) -> bool {
    match operator {
        ComparisonOperator::Equal => actual.is_some_and(|a| a == expected),
        ComparisonOperator::NotEqual => actual.map_or(true, |a| a != expected),
        ComparisonOperator::LessThan => {
            actual.and_then(|a| order(a, expected)) == Some(Ordering::Less)
        }
        ComparisonOperator::GreaterThan => {
            actual.and_then(|a| order(a, expected)) == Some(Ordering::Greater)
        }
        ComparisonOperator::LessThanOrEqual => matches!(
            actual.and_then(|a| order(a, expected)),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ComparisonOperator::GreaterThanOrEqual => matches!(
            actual.and_then(|a| order(a, expected)),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ComparisonOperator::StartsWith => match (actual, expected) {
            (Some(Value::String(a)), Value::String(prefix)) => a.starts_with(prefix.as_str()),
            _ => false,
        },
        ComparisonOperator::In => match (actual, expected) {
            (Some(a), Value::Array(options)) => options.contains(a),
            _ => false,
        },
        ComparisonOperator::Includes => match actual {
            Some(Value::Array(elements)) => elements.contains(expected),
            Some(Value::String(haystack)) => expected
                .as_str()
                .is_some_and(|needle| haystack.contains(needle)),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projection() -> Value {
        json!({
            "content_type": "Note",
            "title": "Groceries",
            "pinned": true,
            "count": 3,
            "tags": ["a", "b"],
            "content": {"nested": {"flag": "x"}}
        })
    }

    #[test]
    fn comparisons() {
        let p = projection();
        assert!(Predicate::new("content_type", ComparisonOperator::Equal, json!("Note")).evaluate(&p));
        assert!(Predicate::new("archived", ComparisonOperator::NotEqual, json!(true)).evaluate(&p));
        assert!(!Predicate::new("archived", ComparisonOperator::Equal, json!(true)).evaluate(&p));
        assert!(Predicate::new("count", ComparisonOperator::GreaterThan, json!(2)).evaluate(&p));
        assert!(Predicate::new("count", ComparisonOperator::LessThanOrEqual, json!(3)).evaluate(&p));
        assert!(Predicate::new("title", ComparisonOperator::StartsWith, json!("Groc")).evaluate(&p));
        assert!(Predicate::new("content_type", ComparisonOperator::In, json!(["Tag", "Note"])).evaluate(&p));
        assert!(Predicate::new("tags", ComparisonOperator::Includes, json!("b")).evaluate(&p));
        assert!(Predicate::new("content.nested.flag", ComparisonOperator::Equal, json!("x")).evaluate(&p));
    }

    #[test]
    fn compound_predicates() {
        let p = projection();
        let pinned_note = Predicate::and(vec![
            Predicate::new("content_type", ComparisonOperator::Equal, json!("Note")),
            Predicate::new("pinned", ComparisonOperator::Equal, json!(true)),
        ]);
        assert!(pinned_note.evaluate(&p));
        assert!(!Predicate::not(pinned_note.clone()).evaluate(&p));
        assert!(Predicate::or(vec![
            Predicate::new("title", ComparisonOperator::Equal, json!("nope")),
            pinned_note,
        ])
        .evaluate(&p));
    }

    #[test]
    fn serialized_shape() {
        let predicate: Predicate = serde_json::from_value(json!({
            "keypath": "title",
            "operator": "startsWith",
            "value": "Groc"
        }))
        .unwrap();
        assert!(predicate.evaluate(&projection()));

        let compound: Predicate = serde_json::from_value(json!({
            "operator": "and",
            "value": [{"keypath": "pinned", "operator": "=", "value": true}]
        }))
        .unwrap();
        assert!(matches!(compound, Predicate::Compound { .. }));
    }
}
