//! InfraClusterClient trait for mocking
//!
//! The VM manager only depends on this trait; the concrete kube-backed
//! client implements it, and tests use `MockInfraClient`.

use crate::error::InfraError;
use crds::{VirtualMachine, VirtualMachineInstance};
use k8s_openapi::api::core::v1::Secret;

/// Namespaced CRUD over the infra cluster objects a machine maps to.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Lookups of absent objects return [`InfraError::NotFound`].
#[async_trait::async_trait]
pub trait InfraClusterClient: Send + Sync {
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, InfraError>;
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, InfraError>;
    async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, InfraError>;
    async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<(), InfraError>;
    async fn list_virtual_machines(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<VirtualMachine>, InfraError>;
    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, InfraError>;
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, InfraError>;
}
