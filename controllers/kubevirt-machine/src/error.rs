//! Controller-specific error types.
//!
//! Errors are split by who can fix them. A [`ConfigurationError`] needs a
//! human to change the machine or the cluster configuration and is retried
//! slowly; everything coming back from a remote cluster is assumed
//! transient and retried on the normal requeue interval.

use crate::vm_manager::Operation;
use crds::MACHINE_CLUSTER_ID_LABEL;
use infra_client::InfraError;
use kube::Error as KubeError;
use tenant_client::TenantError;
use thiserror::Error;

/// Invalid machine or cluster configuration. Never retried quickly.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{machine}: missing {label:?} label", label = MACHINE_CLUSTER_ID_LABEL)]
    MissingClusterLabel { machine: String },

    #[error("failed to get machine config: {0}")]
    ProviderSpec(#[source] serde_json::Error),

    #[error("{machine}: missing value for {field}")]
    MissingField { machine: String, field: &'static str },

    #[error("{machine}: Value of PersistentVolumeAccessMode, can be only one of: ReadWriteMany, ReadOnlyMany, ReadWriteOnce")]
    InvalidAccessMode { machine: String, value: String },

    #[error("{machine}: invalid quantity {value:?} for {field}")]
    InvalidQuantity {
        machine: String,
        field: &'static str,
        value: String,
    },

    #[error("failed to get machine provider status: {0}")]
    ProviderStatus(#[source] serde_json::Error),

    #[error("invalid ignition payload: {0}")]
    IgnitionPayload(String),

    #[error("Tenant-cluster secret {namespace}/{name} not found")]
    UserDataSecretNotFound { namespace: String, name: String },

    #[error("Tenant-cluster secret {namespace}/{name} doesn't contain the key {key}")]
    UserDataKeyMissing {
        namespace: String,
        name: String,
        key: &'static str,
    },

    #[error("configMap {namespace}/{name}: the map extracted with key {data_key} doesn't contain key {key}")]
    MissingConfigKey {
        namespace: String,
        name: String,
        data_key: String,
        key: &'static str,
    },

    #[error("infra cluster credentials secret {namespace}/{name}: {reason}")]
    InfraCredentials {
        namespace: String,
        name: String,
        reason: String,
    },
}

/// Failure of a VM Manager operation, naming the machine and the step.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("{machine}: Error during {operation}: failed to build Virtual Machine struct, with error: {source}")]
    Build {
        machine: String,
        operation: Operation,
        source: ConfigurationError,
    },

    #[error("{machine}: Error during {operation}: failed to add hostname to ignition payload, with error: {source}")]
    Ignition {
        machine: String,
        operation: Operation,
        source: ConfigurationError,
    },

    #[error("{machine}: Error during {operation}: {step}, with error: {source}")]
    Infra {
        machine: String,
        operation: Operation,
        step: &'static str,
        source: InfraError,
    },

    #[error("{machine}: Error during {operation}: failed to sync the Machine, with error: {source}")]
    Sync {
        machine: String,
        operation: Operation,
        source: ConfigurationError,
    },
}

impl VmError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VmError::Infra { .. })
    }
}

/// What went wrong inside an actuator operation after the scope was built
#[derive(Debug, Error)]
pub enum ReconcileFailure {
    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Tenant(#[from] TenantError),
}

impl ReconcileFailure {
    pub fn is_fatal(&self) -> bool {
        match self {
            ReconcileFailure::Vm(e) => e.is_fatal(),
            ReconcileFailure::Configuration(_) => true,
            ReconcileFailure::Tenant(_) => false,
        }
    }
}

/// Errors that can occur in the kubevirt machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{machine}: failed to create scope for machine: {source}")]
    Scope {
        machine: String,
        source: ConfigurationError,
    },

    #[error("{machine}: kubevirt wrapper failed to {operation} machine: {source}")]
    Reconcile {
        machine: String,
        operation: Operation,
        source: ReconcileFailure,
    },

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid process configuration (environment)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid bootstrap configuration read from the cluster
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Tenant cluster error: {0}")]
    Tenant(#[from] TenantError),

    #[error("Infra cluster error: {0}")]
    Infra(#[from] InfraError),

    /// Watch error
    #[error("Watch error: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether retrying without a configuration change is pointless
    pub fn is_fatal(&self) -> bool {
        match self {
            ControllerError::Scope { .. }
            | ControllerError::InvalidConfig(_)
            | ControllerError::Configuration(_) => true,
            ControllerError::Reconcile { source, .. } => source.is_fatal(),
            ControllerError::Kube(_)
            | ControllerError::Tenant(_)
            | ControllerError::Infra(_)
            | ControllerError::Watch(_) => false,
        }
    }
}
