//! Update documents: `$set`, `$unset`, `$inc`, `$push`, or replacement.

use docmodel_core::{Document, Error, Result, StoreErrorKind, Value};

fn invalid(message: impl Into<String>) -> Error {
    Error::store(StoreErrorKind::InvalidOperation, message)
}

/// Whether `update` uses operators rather than replacing the document.
pub fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Apply `update` to `doc` in place; returns whether anything changed.
///
/// A replacement keeps the original `_id`.
pub fn apply(doc: &mut Document, update: &Document) -> Result<bool> {
    if !is_operator_update(update) {
        if update.keys().any(|k| k.starts_with('$')) {
            return Err(invalid("Cannot mix update operators and replacement fields"));
        }
        let mut replacement = Document::new();
        if let Some(id) = doc.get("_id") {
            replacement.insert("_id", id.clone());
        }
        for (k, v) in update {
            if k != "_id" {
                replacement.insert(k.clone(), v.clone());
            }
        }
        let changed = *doc != replacement;
        *doc = replacement;
        return Ok(changed);
    }

    let mut changed = false;
    for (op, fields) in update {
        let Some(fields) = fields.as_document() else {
            return Err(invalid(format!("{} requires a document", op)));
        };
        for (path, operand) in fields {
            if path == "_id" {
                return Err(invalid("Performing an update on '_id' is not allowed"));
            }
            changed |= match op.as_str() {
                "$set" => set(doc, path, operand.clone())?,
                "$unset" => doc.remove_path(path).is_some(),
                "$inc" => increment(doc, path, operand)?,
                "$push" => push(doc, path, operand)?,
                other => return Err(invalid(format!("Unknown update operator: {}", other))),
            };
        }
    }
    Ok(changed)
}

fn set(doc: &mut Document, path: &str, value: Value) -> Result<bool> {
    if doc.get_path(path) == Some(&value) {
        return Ok(false);
    }
    if doc.set_path(path, value) {
        Ok(true)
    } else {
        Err(invalid(format!("Cannot create field in path '{}'", path)))
    }
}

fn increment(doc: &mut Document, path: &str, by: &Value) -> Result<bool> {
    let next = match (doc.get_path(path), by) {
        (None, by) if matches!(by, Value::Int(_) | Value::Double(_)) => by.clone(),
        (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a.saturating_add(*b)),
        (Some(a @ (Value::Int(_) | Value::Double(_))), b @ (Value::Int(_) | Value::Double(_))) => {
            Value::Double(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
        }
        _ => {
            return Err(invalid(format!(
                "Cannot apply $inc to non-numeric field '{}'",
                path
            )));
        }
    };
    set(doc, path, next)
}

fn push(doc: &mut Document, path: &str, value: &Value) -> Result<bool> {
    let mut items = match doc.get_path(path) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(invalid(format!(
                "The field '{}' must be an array for $push",
                path
            )));
        }
    };
    items.push(value.clone());
    set(doc, path, Value::Array(items))
}

/// Seed document for an upsert: the plain equality fields of `criteria`.
pub fn upsert_seed(criteria: &Document) -> Document {
    let mut seed = Document::new();
    for (key, value) in criteria {
        if key.starts_with('$') {
            continue;
        }
        let is_operator = value
            .as_document()
            .is_some_and(|d| d.keys().any(|k| k.starts_with('$')));
        if !is_operator {
            seed.set_path(key, value.clone());
        }
    }
    seed
}
