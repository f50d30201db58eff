//! Declarative event filters.
//!
//! A filter is a JSON predicate tree compiled once into a [`Filter`] and then
//! evaluated against an event's filter view. Supported forms:
//!
//! - `{"field": value}`: loose equality (`123` matches `"123"`)
//! - `{"field": [a, b]}`: membership
//! - `{"field": true|false}`: boolean field test; when the field is not a
//!   boolean the literal forces pass (`true`) or fail (`false`)
//! - `{"field": {"$gt": 1, "$lte": 5}}`: comparisons (`$gt`, `$gte`, `$lt`,
//!   `$lte`, `$like`, `$regexp`, `$between`)
//! - `{"field": {"sub": ...}}`: nested object filter
//! - `$and`, `$or`, `$not`, `$nor` over an array of sub-filters or a map
//!   (a map counts as a single conjunctive sub-filter)
//!
//! Sibling keys are conjunctive.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{FilterError, FilterResult};

#[derive(Debug, Clone)]
enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    Not(Box<Node>),
    Field { name: String, condition: Condition },
}

#[derive(Debug, Clone)]
enum Condition {
    Flag(bool),
    Equals(Value),
    OneOf(Vec<Value>),
    Compare(Vec<Comparison>),
    Nested(Box<Node>),
}

#[derive(Debug, Clone)]
enum Comparison {
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Like(Regex),
    Regexp(Regex),
    Between(Value, Value),
}

const COMPARISON_OPS: &[&str] = &["$gt", "$gte", "$lt", "$lte", "$like", "$regexp", "$between"];

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub struct Filter {
    root: Node,
}

impl Default for Filter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl Filter {
    /// A filter that matches every event.
    pub fn accept_all() -> Self {
        Self {
            root: Node::All(Vec::new()),
        }
    }

    /// Compiles a filter expression.
    ///
    /// The top level must be an object (conjunction of its entries) or an
    /// array of objects (conjunction of the sub-filters). `null` compiles to
    /// [`Filter::accept_all`].
    pub fn compile(expr: &Value) -> FilterResult<Self> {
        let root = match expr {
            Value::Null => Node::All(Vec::new()),
            Value::Object(map) => compile_object(map)?,
            Value::Array(_) => Node::All(compile_group("$and", expr)?),
            other => {
                return Err(FilterError::MalformedLogical {
                    op: "$and".into(),
                    found: type_name(other),
                });
            }
        };
        Ok(Self { root })
    }

    /// Evaluates the filter against an event view.
    pub fn matches(&self, event: &Value) -> bool {
        eval(&self.root, event)
    }
}

// ─── Compilation ──────────────────────────────────────────────────────────────

fn compile_object(map: &Map<String, Value>) -> FilterResult<Node> {
    map.iter()
        .map(|(key, value)| compile_entry(key, value))
        .collect::<FilterResult<Vec<_>>>()
        .map(Node::All)
}

fn compile_entry(key: &str, value: &Value) -> FilterResult<Node> {
    match key {
        "$and" => Ok(Node::All(compile_group(key, value)?)),
        "$or" => Ok(Node::Any(compile_group(key, value)?)),
        "$not" => Ok(Node::Not(Box::new(Node::All(compile_group(key, value)?)))),
        "$nor" => Ok(Node::Not(Box::new(Node::Any(compile_group(key, value)?)))),
        op if op.starts_with('$') => Err(FilterError::UnknownOperator(op.to_string())),
        field => Ok(Node::Field {
            name: field.to_string(),
            condition: compile_condition(value)?,
        }),
    }
}

fn compile_group(op: &str, value: &Value) -> FilterResult<Vec<Node>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => compile_object(map),
                other => Err(FilterError::MalformedLogical {
                    op: op.to_string(),
                    found: type_name(other),
                }),
            })
            .collect(),
        Value::Object(map) => Ok(vec![compile_object(map)?]),
        other => Err(FilterError::MalformedLogical {
            op: op.to_string(),
            found: type_name(other),
        }),
    }
}

fn compile_condition(value: &Value) -> FilterResult<Condition> {
    match value {
        Value::Bool(flag) => Ok(Condition::Flag(*flag)),
        Value::Array(items) => Ok(Condition::OneOf(items.clone())),
        Value::Object(map) if map.keys().any(|k| COMPARISON_OPS.contains(&k.as_str())) => map
            .iter()
            .map(|(op, operand)| compile_comparison(op, operand))
            .collect::<FilterResult<Vec<_>>>()
            .map(Condition::Compare),
        Value::Object(map) => Ok(Condition::Nested(Box::new(compile_object(map)?))),
        scalar => Ok(Condition::Equals(scalar.clone())),
    }
}

fn compile_comparison(op: &str, operand: &Value) -> FilterResult<Comparison> {
    let invalid = |reason: &str| FilterError::InvalidOperand {
        op: op.to_string(),
        reason: reason.to_string(),
    };
    let ordered = |value: &Value| -> FilterResult<Value> {
        match value {
            Value::Number(_) | Value::String(_) => Ok(value.clone()),
            _ => Err(invalid("expected a number or string")),
        }
    };

    match op {
        "$gt" => Ok(Comparison::Gt(ordered(operand)?)),
        "$gte" => Ok(Comparison::Gte(ordered(operand)?)),
        "$lt" => Ok(Comparison::Lt(ordered(operand)?)),
        "$lte" => Ok(Comparison::Lte(ordered(operand)?)),
        "$like" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| invalid("expected a string pattern"))?;
            Ok(Comparison::Like(like_to_regex(pattern)?))
        }
        "$regexp" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| invalid("expected a string pattern"))?;
            let regex = Regex::new(pattern).map_err(|e| FilterError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Comparison::Regexp(regex))
        }
        "$between" => match operand.as_array().map(Vec::as_slice) {
            Some([low, high]) => Ok(Comparison::Between(ordered(low)?, ordered(high)?)),
            _ => Err(invalid("expected a two-element array")),
        },
        other if other.starts_with('$') => Err(FilterError::UnknownOperator(other.to_string())),
        other => Err(invalid(&format!(
            "field '{other}' cannot be mixed with comparison operators"
        ))),
    }
}

/// Translates a SQL `LIKE` pattern into an unanchored case-insensitive regex.
fn like_to_regex(pattern: &str) -> FilterResult<Regex> {
    let mut translated = String::from("(?is)");
    for c in pattern.chars() {
        match c {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            other => translated.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    Regex::new(&translated).map_err(|e| FilterError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Evaluation ───────────────────────────────────────────────────────────────

fn eval(node: &Node, event: &Value) -> bool {
    match node {
        Node::All(nodes) => nodes.iter().all(|n| eval(n, event)),
        Node::Any(nodes) => nodes.iter().any(|n| eval(n, event)),
        Node::Not(inner) => !eval(inner, event),
        Node::Field { name, condition } => {
            let field = event.get(name).unwrap_or(&Value::Null);
            eval_condition(condition, field)
        }
    }
}

fn eval_condition(condition: &Condition, field: &Value) -> bool {
    match condition {
        Condition::Flag(flag) => match field {
            Value::Bool(actual) => actual == flag,
            _ => *flag,
        },
        Condition::Equals(expected) => loose_eq(field, expected),
        Condition::OneOf(options) => options.iter().any(|o| loose_eq(field, o)),
        Condition::Compare(comparisons) => comparisons.iter().all(|c| compare(c, field)),
        Condition::Nested(node) => eval(node, field),
    }
}

fn compare(comparison: &Comparison, field: &Value) -> bool {
    match comparison {
        Comparison::Gt(bound) => order(field, bound) == Some(Ordering::Greater),
        Comparison::Gte(bound) => matches!(
            order(field, bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::Lt(bound) => order(field, bound) == Some(Ordering::Less),
        Comparison::Lte(bound) => {
            matches!(order(field, bound), Some(Ordering::Less | Ordering::Equal))
        }
        Comparison::Between(low, high) => {
            matches!(order(field, low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(order(field, high), Some(Ordering::Less | Ordering::Equal))
        }
        Comparison::Like(regex) | Comparison::Regexp(regex) => {
            text_of(field).is_some_and(|text| regex.is_match(&text))
        }
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric ordering when both sides are numeric, lexical otherwise.
fn order(field: &Value, bound: &Value) -> Option<Ordering> {
    match (number_of(field), number_of(bound)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (field, bound) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

/// Equality that treats numbers and numeric strings alike.
fn loose_eq(field: &Value, expected: &Value) -> bool {
    match (field, expected) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (number_of(field), number_of(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => field == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(expr: Value) -> Filter {
        Filter::compile(&expr).unwrap()
    }

    #[test]
    fn test_or_with_not() {
        let filter = compile(json!({
            "$or": [
                { "message_type": "private" },
                { "message_type": "group", "$not": { "user_id": 123 } },
            ]
        }));

        assert!(filter.matches(&json!({ "message_type": "group", "user_id": 456 })));
        assert!(!filter.matches(&json!({ "message_type": "group", "user_id": 123 })));
        assert!(filter.matches(&json!({ "message_type": "private", "user_id": 123 })));
    }

    #[test]
    fn test_group_messages_except_one_user() {
        let filter = compile(json!({
            "$and": [
                { "message_type": "group" },
                { "$not": { "user_id": 123 } },
            ]
        }));

        assert!(filter.matches(&json!({ "message_type": "group", "user_id": 456 })));
        assert!(!filter.matches(&json!({ "message_type": "group", "user_id": 123 })));
        assert!(!filter.matches(&json!({ "message_type": "private", "user_id": 456 })));
    }

    #[test]
    fn test_loose_equality_across_id_forms() {
        let filter = compile(json!({ "user_id": 123 }));
        assert!(filter.matches(&json!({ "user_id": "123" })));
        assert!(filter.matches(&json!({ "user_id": 123 })));
        assert!(!filter.matches(&json!({ "user_id": "u123" })));
    }

    #[test]
    fn test_membership() {
        let filter = compile(json!({ "group_id": [1, "2", "abc"] }));
        assert!(filter.matches(&json!({ "group_id": "1" })));
        assert!(filter.matches(&json!({ "group_id": 2 })));
        assert!(filter.matches(&json!({ "group_id": "abc" })));
        assert!(!filter.matches(&json!({ "group_id": 3 })));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_boolean_literal_forces_result() {
        let pass = compile(json!({ "anything": true }));
        let fail = compile(json!({ "anything": false }));
        assert!(pass.matches(&json!({})));
        assert!(!fail.matches(&json!({ "anything": "x" })));

        // A real boolean field is compared.
        assert!(!pass.matches(&json!({ "anything": false })));
        assert!(fail.matches(&json!({ "anything": false })));
    }

    #[test]
    fn test_comparisons() {
        let filter = compile(json!({ "time": { "$gte": 10, "$lt": 20 } }));
        assert!(filter.matches(&json!({ "time": 10 })));
        assert!(filter.matches(&json!({ "time": "15" })));
        assert!(!filter.matches(&json!({ "time": 20 })));
        assert!(!filter.matches(&json!({})));

        let between = compile(json!({ "time": { "$between": [1, 3] } }));
        assert!(between.matches(&json!({ "time": 1 })));
        assert!(between.matches(&json!({ "time": 3 })));
        assert!(!between.matches(&json!({ "time": 4 })));
    }

    #[test]
    fn test_like_and_regexp() {
        let like = compile(json!({ "raw_message": { "$like": "he_lo%" } }));
        assert!(like.matches(&json!({ "raw_message": "say HELLO world" })));
        assert!(!like.matches(&json!({ "raw_message": "help" })));

        let plain = compile(json!({ "raw_message": { "$like": "a.b" } }));
        assert!(plain.matches(&json!({ "raw_message": "xa.by" })));
        assert!(!plain.matches(&json!({ "raw_message": "axb" })));

        let regexp = compile(json!({ "raw_message": { "$regexp": "^/echo\\s" } }));
        assert!(regexp.matches(&json!({ "raw_message": "/echo hi" })));
        assert!(!regexp.matches(&json!({ "raw_message": "echo hi" })));
    }

    #[test]
    fn test_nested_object() {
        let filter = compile(json!({ "sender": { "role": ["admin", "owner"] } }));
        assert!(filter.matches(&json!({ "sender": { "role": "admin" } })));
        assert!(!filter.matches(&json!({ "sender": { "role": "member" } })));
        assert!(!filter.matches(&json!({ "sender": null })));
    }

    #[test]
    fn test_nor_and_map_groups() {
        let filter = compile(json!({ "$nor": [{ "user_id": 1 }, { "user_id": 2 }] }));
        assert!(filter.matches(&json!({ "user_id": 3 })));
        assert!(!filter.matches(&json!({ "user_id": 2 })));

        let conj = compile(json!({ "$or": { "a": 1, "b": 2 } }));
        assert!(conj.matches(&json!({ "a": 1, "b": 2 })));
        assert!(!conj.matches(&json!({ "a": 1, "b": 3 })));
    }

    #[test]
    fn test_accept_all() {
        assert!(Filter::accept_all().matches(&json!({ "x": 1 })));
        assert!(compile(Value::Null).matches(&json!({})));
        assert!(compile(json!({})).matches(&json!({})));
    }

    #[test]
    fn test_malformed_filters_fail_to_compile() {
        assert!(matches!(
            Filter::compile(&json!({ "$and": "nope" })),
            Err(FilterError::MalformedLogical { .. })
        ));
        assert!(matches!(
            Filter::compile(&json!({ "$or": [1, 2] })),
            Err(FilterError::MalformedLogical { .. })
        ));
        assert!(matches!(
            Filter::compile(&json!({ "$xor": [] })),
            Err(FilterError::UnknownOperator(_))
        ));
        assert!(matches!(
            Filter::compile(&json!({ "x": { "$regexp": "(" } })),
            Err(FilterError::InvalidRegex { .. })
        ));
        assert!(matches!(
            Filter::compile(&json!({ "x": { "$between": [1] } })),
            Err(FilterError::InvalidOperand { .. })
        ));
        assert!(matches!(
            Filter::compile(&json!({ "x": { "$gt": 1, "$foo": 2 } })),
            Err(FilterError::UnknownOperator(_))
        ));
        assert!(Filter::compile(&json!("text")).is_err());
    }
}
