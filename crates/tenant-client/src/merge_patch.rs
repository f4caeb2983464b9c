//! JSON merge patches (RFC 7386)
//!
//! The actuator mutates a copy of the machine and writes back only what
//! changed. [`diff`] computes the merge patch turning one document into
//! another; the API server (and the mock client, through
//! `json_patch::merge`) applies it.

use crate::error::TenantError;
use crds::Machine;
use serde_json::{Map, Value};

/// Merge patch turning `old` into `new`.
///
/// Returns an empty object when the documents are equal. Arrays are
/// replaced wholesale, removed keys become `null`.
pub fn diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value @ Value::Object(_)) if new_value.is_object() => {
                        patch.insert(key.clone(), diff(old_value, new_value));
                    }
                    _ => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// True for `{}`
pub fn is_empty(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Merge patch over metadata and spec; `None` when nothing changed.
pub fn machine_patch(new: &Machine, old: &Machine) -> Result<Option<Value>, TenantError> {
    let mut new = serde_json::to_value(new)?;
    let mut old = serde_json::to_value(old)?;
    for document in [&mut new, &mut old] {
        if let Some(object) = document.as_object_mut() {
            object.remove("status");
        }
    }
    let patch = diff(&old, &new);
    Ok((!is_empty(&patch)).then_some(patch))
}

/// Merge patch over the status subresource; `None` when nothing changed.
pub fn machine_status_patch(new: &Machine, old: &Machine) -> Result<Option<Value>, TenantError> {
    let new_status = serde_json::to_value(&new.status)?;
    let old_status = serde_json::to_value(&old.status)?;
    let status = diff(&old_status, &new_status);
    if is_empty(&status) {
        return Ok(None);
    }
    Ok(Some(serde_json::json!({ "status": status })))
}
