//! Ignition payload handling.
//!
//! The user data referenced by a machine is an Ignition JSON document. The
//! VM needs to know its own name at first boot, so `/etc/hostname` is
//! appended to `storage.files` before the payload is handed to kubevirt.

use crate::error::ConfigurationError;
use serde_json::{json, Map, Value};

/// Append an `/etc/hostname` file entry carrying `hostname`.
///
/// An empty payload is treated as `{}`. The entry is appended even if one
/// already exists.
pub fn add_hostname(user_data: &[u8], hostname: &str) -> Result<Vec<u8>, ConfigurationError> {
    let mut document: Value = if user_data.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(user_data).map_err(|e| ConfigurationError::IgnitionPayload(e.to_string()))?
    };

    let root = document
        .as_object_mut()
        .ok_or_else(|| ConfigurationError::IgnitionPayload("payload is not a JSON object".to_string()))?;
    let storage = root
        .entry("storage")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ConfigurationError::IgnitionPayload("storage is not an object".to_string()))?;
    let files = storage
        .entry("files")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| ConfigurationError::IgnitionPayload("storage.files is not a list".to_string()))?;

    files.push(json!({
        "filesystem": "root",
        "path": "/etc/hostname",
        "mode": 420,
        "contents": {
            "source": format!("data:,{}", hostname),
        },
    }));

    serde_json::to_vec(&document).map_err(|e| ConfigurationError::IgnitionPayload(e.to_string()))
}
