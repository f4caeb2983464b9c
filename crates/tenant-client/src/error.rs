//! Tenant cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the tenant cluster
#[derive(Debug, Error)]
pub enum TenantError {
    /// Kubernetes API error other than 404
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Machine could not be encoded for patch computation
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config map is missing the requested key or the value is not a flat map
    #[error("Invalid config map {name}: {reason}")]
    InvalidConfigMap { name: String, reason: String },
}

impl TenantError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TenantError::NotFound(_))
    }
}
