//! Machine actuator.
//!
//! Entry point for one reconcile of one machine. Every call builds a fresh
//! [`MachineScope`], runs the VM Manager operation inside the scope's span,
//! writes the mutated machine back to the tenant cluster and raises an
//! event describing the outcome.
//!
//! Create and Update always write back, even when the operation failed, so
//! that progress made before the failure (a provider ID, an instance
//! state) is not lost. The write is a spec patch followed by a status
//! patch, both computed against the machine as it was received.

use crate::config::BootstrapConfig;
use crate::error::{ConfigurationError, ControllerError, ReconcileFailure};
use crate::events::EventPublisher;
use crate::machine_scope::MachineScope;
use crate::vm_manager::{Operation, VmManager};
use chrono::Utc;
use crds::Machine;
use kube::runtime::events::EventType;
use kube::Resource;
use std::sync::Arc;
use tenant_client::{TenantClusterClient, TenantError};
use tracing::{error, info, Instrument};

/// Key of the ignition payload in the tenant user data secret
pub const USER_DATA_SECRET_KEY: &str = "userData";

/// Reconciles machines against infra cluster VMs.
pub struct Actuator {
    vm_manager: VmManager,
    tenant: Arc<dyn TenantClusterClient>,
    events: Arc<dyn EventPublisher>,
    bootstrap: BootstrapConfig,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("bootstrap", &self.bootstrap)
            .finish_non_exhaustive()
    }
}

impl Actuator {
    pub fn new(
        vm_manager: VmManager,
        tenant: Arc<dyn TenantClusterClient>,
        events: Arc<dyn EventPublisher>,
        bootstrap: BootstrapConfig,
    ) -> Self {
        Self {
            vm_manager,
            tenant,
            events,
            bootstrap,
        }
    }

    pub fn create_scope(&self, machine: &Machine) -> Result<MachineScope, ControllerError> {
        MachineScope::new(
            machine.clone(),
            &self.bootstrap.infra_namespace,
            &self.bootstrap.infra_id,
        )
        .map_err(|source| {
            let err = ControllerError::Scope {
                machine: machine.name().to_string(),
                source,
            };
            error!("{}", err);
            err
        })
    }

    /// Provision the machine's VM.
    pub async fn create(&self, machine: &Machine) -> Result<(), ControllerError> {
        let mut scope = self.create_scope(machine)?;
        let span = scope.span().clone();
        async {
            info!("Actuator creating machine");
            let user_data = match self.user_data(&scope).await {
                Ok(user_data) => user_data,
                Err(failure) => return Err(self.fail(machine, Operation::Create, failure).await),
            };

            let result = self.vm_manager.create(&mut scope, &user_data).await;
            let patched = self.patch_machine(scope.machine(), machine).await;
            if let Err(failure) = merge_outcome(result.map_err(ReconcileFailure::from), patched) {
                return Err(self.fail(machine, Operation::Create, failure).await);
            }

            self.publish(machine, EventType::Normal, Operation::Create, format!("Created Machine {}", machine.name()))
                .await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Whether the machine's VM exists. Raises no event.
    pub async fn exists(&self, machine: &Machine) -> Result<bool, ControllerError> {
        let scope = self.create_scope(machine)?;
        info!(machine = %machine.name(), "Actuator checking if machine exists");
        self.vm_manager
            .exists(&scope)
            .await
            .map_err(|source| ControllerError::Reconcile {
                machine: machine.name().to_string(),
                operation: Operation::Exists,
                source: source.into(),
            })
    }

    /// Sync the VM with the machine and the machine status with the VM.
    pub async fn update(&self, machine: &Machine) -> Result<(), ControllerError> {
        let mut scope = self.create_scope(machine)?;
        let span = scope.span().clone();
        async {
            info!("Actuator updating machine");
            let result = self.vm_manager.update(&mut scope).await;
            let patched = self.patch_machine(scope.machine(), machine).await;
            let was_updated = match merge_outcome(result.map_err(ReconcileFailure::from), patched) {
                Ok(was_updated) => was_updated,
                Err(failure) => return Err(self.fail(machine, Operation::Update, failure).await),
            };

            if was_updated {
                self.publish(machine, EventType::Normal, Operation::Update, format!("Updated Machine {}", machine.name()))
                    .await;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Remove the machine's VM.
    pub async fn delete(&self, machine: &Machine) -> Result<(), ControllerError> {
        let scope = self.create_scope(machine)?;
        let span = scope.span().clone();
        async {
            info!("Actuator deleting machine");
            if let Err(e) = self.vm_manager.delete(&scope).await {
                return Err(self.fail(machine, Operation::Delete, e.into()).await);
            }
            self.publish(machine, EventType::Normal, Operation::Delete, format!("Deleted machine {}", machine.name()))
                .await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Read the ignition payload the machine points at.
    async fn user_data(&self, scope: &MachineScope) -> Result<Vec<u8>, ReconcileFailure> {
        let name = scope.ignition_secret_name();
        let namespace = scope.machine_namespace();
        let secret = match self.tenant.get_secret(name, namespace).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => {
                return Err(ConfigurationError::UserDataSecretNotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        secret
            .data
            .and_then(|mut data| data.remove(USER_DATA_SECRET_KEY))
            .map(|bytes| bytes.0)
            .ok_or_else(|| {
                ConfigurationError::UserDataKeyMissing {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    key: USER_DATA_SECRET_KEY,
                }
                .into()
            })
    }

    /// Patch spec, then status, of `updated` against `original`.
    ///
    /// `status.lastUpdated` is stamped whenever the status changed.
    async fn patch_machine(&self, updated: &Machine, original: &Machine) -> Result<(), TenantError> {
        let mut updated = updated.clone();
        if let Err(e) = self.tenant.patch_machine(&updated, original).await {
            error!("Failed to patch machine {}: {}", updated.name(), e);
            return Err(e);
        }

        if updated.status != original.status {
            updated.status.get_or_insert_with(Default::default).last_updated = Some(Utc::now());
        }
        if let Err(e) = self.tenant.status_patch_machine(&updated, original).await {
            error!("Failed to patch machine status {}: {}", updated.name(), e);
            return Err(e);
        }
        Ok(())
    }

    async fn fail(&self, machine: &Machine, operation: Operation, failure: ReconcileFailure) -> ControllerError {
        let err = ControllerError::Reconcile {
            machine: machine.name().to_string(),
            operation,
            source: failure,
        };
        error!("{} error: {}", machine.name(), err);
        self.events
            .publish(
                &machine.object_ref(&()),
                EventType::Warning,
                &format!("Failed{}", operation),
                operation.as_str(),
                Some(err.to_string()),
            )
            .await;
        err
    }

    async fn publish(&self, machine: &Machine, type_: EventType, operation: Operation, note: String) {
        self.events
            .publish(&machine.object_ref(&()), type_, operation.as_str(), operation.as_str(), Some(note))
            .await;
    }
}

/// A failed write-back replaces the operation's own outcome.
fn merge_outcome<T>(result: Result<T, ReconcileFailure>, patched: Result<(), TenantError>) -> Result<T, ReconcileFailure> {
    patched?;
    result
}

#[cfg(test)]
#[path = "actuator_test.rs"]
mod actuator_test;
