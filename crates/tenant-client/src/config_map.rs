//! Flat configuration maps stored as YAML under a config map key

use crate::error::TenantError;
use std::collections::BTreeMap;

/// Parse a YAML (or JSON) mapping of scalars into strings.
///
/// Numbers and booleans are rendered with their YAML spelling; nested
/// mappings or sequences are rejected.
pub fn parse_flat_map(config_map: &str, raw: &str) -> Result<BTreeMap<String, String>, TenantError> {
    let invalid = |reason: String| TenantError::InvalidConfigMap {
        name: config_map.to_string(),
        reason,
    };
    let parsed: BTreeMap<String, serde_yaml::Value> =
        serde_yaml::from_str(raw).map_err(|e| invalid(format!("failed to parse value: {}", e)))?;

    parsed
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => return Err(invalid(format!("value of {} is not a scalar", key))),
            };
            Ok((key, value))
        })
        .collect()
}
