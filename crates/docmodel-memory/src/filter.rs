//! Criteria matching.
//!
//! Supported: implicit equality (an array field matches when any element
//! equals the target), `$eq $ne $gt $gte $lt $lte $in $nin $exists $regex`
//! on fields, `$and $or $nor` at any document level, dotted paths.

use docmodel_core::{Document, Error, Result, StoreErrorKind, Value};
use regex::RegexBuilder;
use std::cmp::Ordering;

fn invalid(message: impl Into<String>) -> Error {
    Error::store(StoreErrorKind::InvalidOperation, message)
}

/// Whether `doc` satisfies `criteria`.
pub fn matches(doc: &Document, criteria: &Document) -> Result<bool> {
    for (key, condition) in criteria {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(invalid(format!("Unknown top-level operator: {}", op)));
            }
            path => field_matches(doc.get_path(path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Value) -> Result<Vec<&'a Document>> {
    let Value::Array(items) = condition else {
        return Err(invalid(format!("{} requires an array", op)));
    };
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| invalid(format!("{} entries must be documents", op)))
        })
        .collect()
}

fn is_operator_document(condition: &Value) -> bool {
    match condition {
        Value::Document(d) => !d.is_empty() && d.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool> {
    let Value::Document(operators) = condition else {
        return Ok(equals(value, condition));
    };
    if !is_operator_document(condition) {
        return Ok(equals(value, condition));
    }
    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compares(value, operand, |o| o == Ordering::Greater),
            "$gte" => compares(value, operand, |o| o != Ordering::Less),
            "$lt" => compares(value, operand, |o| o == Ordering::Less),
            "$lte" => compares(value, operand, |o| o != Ordering::Greater),
            "$in" => in_list(value, operand, op)?,
            "$nin" => !in_list(value, operand, op)?,
            "$exists" => {
                let wanted = match operand {
                    Value::Bool(b) => *b,
                    other => other.as_i64().is_some_and(|n| n != 0),
                };
                value.is_some() == wanted
            }
            "$regex" => regex_matches(value, operand, operators.get("$options"))?,
            "$options" => true,
            other => return Err(invalid(format!("Unknown operator: {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with array-contains semantics; a missing field equals null.
fn equals(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(Value::Array(items)) if !matches!(target, Value::Array(_)) => {
            items.iter().any(|item| item.loose_eq(target))
        }
        Some(v) => v.loose_eq(target),
    }
}

fn same_class(a: &Value, b: &Value) -> bool {
    let numeric = |v: &Value| matches!(v, Value::Int(_) | Value::Double(_));
    (numeric(a) && numeric(b)) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Range comparison; only values of the same class compare.
fn compares(value: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) if !matches!(target, Value::Array(_)) => items
            .iter()
            .any(|item| same_class(item, target) && accept(item.compare(target))),
        Some(v) => same_class(v, target) && accept(v.compare(target)),
    }
}

fn in_list(value: Option<&Value>, operand: &Value, op: &str) -> Result<bool> {
    let Value::Array(candidates) = operand else {
        return Err(invalid(format!("{} requires an array", op)));
    };
    Ok(candidates.iter().any(|c| equals(value, c)))
}

fn regex_matches(value: Option<&Value>, pattern: &Value, options: Option<&Value>) -> Result<bool> {
    let Some(pattern) = pattern.as_str() else {
        return Err(invalid("$regex requires a string pattern"));
    };
    let flags = options.and_then(Value::as_str).unwrap_or("");
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| invalid(format!("Invalid $regex: {}", e)))?;
    Ok(match value {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| regex.is_match(s)),
        _ => false,
    })
}
