//! Infra cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the infra cluster
#[derive(Debug, Error)]
pub enum InfraError {
    /// Kubernetes API error other than the mapped status codes
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (HTTP 409 on create)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency conflict (HTTP 409 on update)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object cannot be sent as-is (e.g. missing name)
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Kubeconfig for the infra cluster could not be loaded
    #[error("Invalid infra cluster credentials: {0}")]
    Credentials(String),
}

impl InfraError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InfraError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, InfraError::AlreadyExists(_))
    }
}
