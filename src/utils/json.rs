//! Helpers for PATCH bodies where "field omitted", "field set to null" and
//! "field set to a value" mean different things.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    /// `None` leaves the column untouched, `Some(None)` clears it.
    pub fn into_change(self) -> Option<Option<T>> {
        match self {
            Patch::Omitted => None,
            Patch::Null => Some(None),
            Patch::Value(value) => Some(Some(value)),
        }
    }

    /// Folds the patch over the current value.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Omitted => current,
            Patch::Null => None,
            Patch::Value(value) => Some(value),
        }
    }
}

/// A trimmed string; blank strings count as null.
pub fn nullable_string(body: &Value, field: &str) -> Result<Patch<String>, String> {
    match body.get(field) {
        None => Ok(Patch::Omitted),
        Some(Value::Null) => Ok(Patch::Null),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(Patch::Null)
            } else {
                Ok(Patch::Value(trimmed.to_owned()))
            }
        }
        Some(other) => Err(format!("{field}: expected string or null, got {other}")),
    }
}

/// A string field that may be changed but never cleared.
pub fn required_string(body: &Value, field: &str) -> Result<Option<String>, String> {
    match nullable_string(body, field)? {
        Patch::Omitted => Ok(None),
        Patch::Null => Err(format!("{field} must not be empty")),
        Patch::Value(value) => Ok(Some(value)),
    }
}

pub fn nullable_i32(body: &Value, field: &str) -> Result<Patch<i32>, String> {
    match body.get(field) {
        None => Ok(Patch::Omitted),
        Some(Value::Null) => Ok(Patch::Null),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Patch::Value)
            .ok_or_else(|| format!("{field}: expected a 32-bit integer, got {n}")),
        Some(other) => Err(format!("{field}: expected integer or null, got {other}")),
    }
}

/// A list of strings; null clears it to an empty list.
pub fn string_list(body: &Value, field: &str) -> Result<Option<Vec<String>>, String> {
    match body.get(field) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(Vec::new())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(format!("{field}: expected strings, got {other}")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(format!("{field}: expected array of strings, got {other}")),
    }
}
