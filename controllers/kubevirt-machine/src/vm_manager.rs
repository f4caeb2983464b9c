//! VM lifecycle against the infra cluster.
//!
//! Each operation composes the pure mapping of a [`MachineScope`] with
//! infra cluster calls and folds the observed VM back into the scope. No
//! operation retries; a failing step ends the operation with a
//! [`VmError`] naming the machine, the operation and the step. Objects
//! created by earlier steps are left in place for the next reconcile.

use crate::address::{node_addresses, AddressResolver};
use crate::error::VmError;
use crate::ignition::add_hostname;
use crate::machine_scope::MachineScope;
use crds::VirtualMachine;
use infra_client::{InfraClusterClient, InfraError};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, Instrument};

/// Grace period for VM deletion
pub const DELETE_GRACE_PERIOD_SECONDS: u32 = 10;

/// Actuator operations, also used as event actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Exists,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "Create",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::Exists => "Exists",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn logged(err: VmError) -> VmError {
    error!("{}", err);
    err
}

/// Drives VMs in the infra cluster on behalf of machines.
pub struct VmManager {
    infra: Arc<dyn InfraClusterClient>,
    resolver: Arc<dyn AddressResolver>,
}

impl fmt::Debug for VmManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmManager").finish_non_exhaustive()
    }
}

impl VmManager {
    pub fn new(infra: Arc<dyn InfraClusterClient>, resolver: Arc<dyn AddressResolver>) -> Self {
        Self { infra, resolver }
    }

    /// Create the ignition secret and the VM, then sync the machine.
    ///
    /// The desired VM is built before anything is sent, so an invalid
    /// provider spec never leaves a secret behind. An ignition secret that
    /// already exists (from an earlier, partially failed attempt) is reused.
    pub async fn create(&self, scope: &mut MachineScope, user_data: &[u8]) -> Result<(), VmError> {
        let span = scope.span().clone();
        self.create_in_scope(scope, user_data).instrument(span).await
    }

    async fn create_in_scope(&self, scope: &mut MachineScope, user_data: &[u8]) -> Result<(), VmError> {
        let machine = scope.machine_name().to_string();
        let operation = Operation::Create;

        let desired = scope.build_desired_virtual_machine().map_err(|source| {
            logged(VmError::Build {
                machine: machine.clone(),
                operation,
                source,
            })
        })?;

        let full_user_data = add_hostname(user_data, &machine).map_err(|source| {
            logged(VmError::Ignition {
                machine: machine.clone(),
                operation,
                source,
            })
        })?;

        let secret = scope.build_ignition_secret(full_user_data);
        match self.infra.create_secret(scope.infra_namespace(), &secret).await {
            Ok(_) => info!("Ignition secret created in infra cluster"),
            Err(e) if e.is_already_exists() => info!("Ignition secret already exists in infra cluster, reusing it"),
            Err(source) => {
                return Err(logged(VmError::Infra {
                    machine,
                    operation,
                    step: "failed to create ignition secret in infraCluster",
                    source,
                }));
            }
        }

        let created = self
            .infra
            .create_virtual_machine(scope.infra_namespace(), &desired)
            .await
            .map_err(|source| {
                logged(VmError::Infra {
                    machine: machine.clone(),
                    operation,
                    step: "failed to create Virtual Machine in infraCluster",
                    source,
                })
            })?;
        info!("VirtualMachine was created in infra cluster");

        self.sync_machine(scope, &created, operation).await
    }

    /// Delete the machine's VM. A VM that is already gone is not an error.
    pub async fn delete(&self, scope: &MachineScope) -> Result<(), VmError> {
        let span = scope.span().clone();
        self.delete_in_scope(scope).instrument(span).await
    }

    async fn delete_in_scope(&self, scope: &MachineScope) -> Result<(), VmError> {
        let machine = scope.machine_name().to_string();
        let operation = Operation::Delete;

        let desired = scope.build_desired_virtual_machine().map_err(|source| {
            logged(VmError::Build {
                machine: machine.clone(),
                operation,
                source,
            })
        })?;

        let existing = match self.infra.get_virtual_machine(desired.namespace(), desired.name()).await {
            Ok(vm) => vm,
            Err(e) if e.is_not_found() => {
                info!("VirtualMachine does not exist (already deleted)");
                return Ok(());
            }
            Err(source) => {
                return Err(logged(VmError::Infra {
                    machine,
                    operation,
                    step: "failed to get Virtual Machine from infraCluster",
                    source,
                }));
            }
        };

        match self
            .infra
            .delete_virtual_machine(existing.namespace(), existing.name(), DELETE_GRACE_PERIOD_SECONDS)
            .await
        {
            Ok(()) => {}
            // Removed between the get and the delete
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(logged(VmError::Infra {
                    machine,
                    operation,
                    step: "failed to delete Virtual Machine in infraCluster",
                    source,
                }));
            }
        }
        info!("VirtualMachine was deleted in infra cluster");
        Ok(())
    }

    /// Push the desired VM over the existing one and sync the machine.
    ///
    /// Returns whether the infra cluster actually changed the VM, judged by
    /// its resource version.
    pub async fn update(&self, scope: &mut MachineScope) -> Result<bool, VmError> {
        let span = scope.span().clone();
        self.update_in_scope(scope).instrument(span).await
    }

    async fn update_in_scope(&self, scope: &mut MachineScope) -> Result<bool, VmError> {
        let machine = scope.machine_name().to_string();
        let operation = Operation::Update;

        let mut desired = scope.build_desired_virtual_machine().map_err(|source| {
            logged(VmError::Build {
                machine: machine.clone(),
                operation,
                source,
            })
        })?;

        let existing = self
            .infra
            .get_virtual_machine(desired.namespace(), desired.name())
            .await
            .map_err(|source| {
                logged(VmError::Infra {
                    machine: machine.clone(),
                    operation,
                    step: "failed to get Virtual Machine from infraCluster",
                    source,
                })
            })?;

        let previous_version = existing.resource_version().to_string();
        desired.metadata.resource_version = existing.metadata.resource_version.clone();
        // Server-owned fields must survive the replace
        let existing_status = existing.status.clone().unwrap_or_default();
        desired.status = Some(crds::VirtualMachineStatus {
            created: existing_status.created,
            ready: existing_status.ready,
            ..Default::default()
        });

        let updated = self
            .infra
            .update_virtual_machine(desired.namespace(), &desired)
            .await
            .map_err(|source| {
                logged(VmError::Infra {
                    machine: machine.clone(),
                    operation,
                    step: "failed to update Virtual Machine in infraCluster",
                    source,
                })
            })?;

        let was_updated = previous_version != updated.resource_version();
        info!(was_updated, "VirtualMachine was updated in infra cluster");

        self.sync_machine(scope, &updated, operation).await?;
        Ok(was_updated)
    }

    /// Whether the machine's VM exists in the infra cluster.
    pub async fn exists(&self, scope: &MachineScope) -> Result<bool, VmError> {
        let span = scope.span().clone();
        async {
            info!("Checking if VirtualMachine exists");
            match self
                .infra
                .get_virtual_machine(scope.infra_namespace(), scope.machine_name())
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => {
                    info!("VirtualMachine of this machine does not exist");
                    Ok(false)
                }
                Err(source) => Err(logged(VmError::Infra {
                    machine: scope.machine_name().to_string(),
                    operation: Operation::Exists,
                    step: "failed to get vm of the Machine",
                    source,
                })),
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch the VM's instance, resolve its addresses and fold both into
    /// the scope. A missing instance (VM not started yet) leaves the
    /// machine's addresses untouched.
    async fn sync_machine(
        &self,
        scope: &mut MachineScope,
        vm: &VirtualMachine,
        operation: Operation,
    ) -> Result<(), VmError> {
        let machine = scope.machine_name().to_string();

        let addresses = match self.infra.get_virtual_machine_instance(vm.namespace(), vm.name()).await {
            Ok(vmi) => {
                let resolution = self.resolver.resolve(vmi.name()).await;
                Some(node_addresses(vmi.name(), &resolution))
            }
            Err(InfraError::NotFound(_)) => {
                info!("VirtualMachineInstance does not exist yet, keeping machine addresses");
                None
            }
            Err(source) => {
                return Err(logged(VmError::Infra {
                    machine,
                    operation,
                    step: "failed to get vmi of the Machine",
                    source,
                }));
            }
        };

        scope.sync_machine(vm, addresses).map_err(|source| {
            logged(VmError::Sync {
                machine,
                operation,
                source,
            })
        })
    }
}

#[cfg(test)]
#[path = "vm_manager_test.rs"]
mod vm_manager_test;
