//! Mock InfraClusterClient for unit testing
//!
//! Keeps virtual machines, instances and secrets in memory and behaves
//! like the API server where the controller relies on it: `uid` and
//! `resourceVersion` are assigned server-side, the resource version only
//! moves when a write actually changes the stored object, and updates
//! leave the status alone.

use crate::error::InfraError;
use crate::infra_trait::InfraClusterClient;
use crds::{VirtualMachine, VirtualMachineInstance};
use k8s_openapi::api::core::v1::Secret;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

type Key = (String, String);

/// Client operations that can be made to fail with [`MockInfraClient::fail_on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfraVerb {
    CreateVirtualMachine,
    GetVirtualMachine,
    UpdateVirtualMachine,
    DeleteVirtualMachine,
    ListVirtualMachines,
    GetVirtualMachineInstance,
    CreateSecret,
}

/// Mock infra cluster client
#[derive(Clone, Default)]
pub struct MockInfraClient {
    virtual_machines: Arc<Mutex<HashMap<Key, VirtualMachine>>>,
    instances: Arc<Mutex<HashMap<Key, VirtualMachineInstance>>>,
    secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    failures: Arc<Mutex<HashSet<InfraVerb>>>,
    deleted: Arc<Mutex<Vec<(Key, u32)>>>,
    next_resource_version: Arc<Mutex<u64>>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn injected_failure(verb: InfraVerb) -> InfraError {
    InfraError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure for {:?}", verb),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

impl MockInfraClient {
    /// Create an empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `verb` fail with a 500
    pub fn fail_on(&self, verb: InfraVerb) {
        self.failures.lock().unwrap().insert(verb);
    }

    /// Stop failing calls of `verb`
    pub fn clear_failure(&self, verb: InfraVerb) {
        self.failures.lock().unwrap().remove(&verb);
    }

    /// Seed a virtual machine (for test setup); assigns uid and version
    pub fn add_virtual_machine(&self, mut vm: VirtualMachine) -> VirtualMachine {
        let namespace = vm.metadata.namespace.clone().unwrap_or_default();
        self.stamp_new(&mut vm, &namespace);
        self.virtual_machines
            .lock()
            .unwrap()
            .insert(key(&namespace, vm.name()), vm.clone());
        vm
    }

    /// Seed a virtual machine instance (for test setup)
    pub fn add_virtual_machine_instance(&self, vmi: VirtualMachineInstance) {
        let namespace = vmi.metadata.namespace.clone().unwrap_or_default();
        self.instances
            .lock()
            .unwrap()
            .insert(key(&namespace, vmi.name()), vmi);
    }

    /// Overwrite the observed status of a stored VM, as kubevirt would.
    /// Bumps the resource version.
    pub fn set_virtual_machine_status(&self, namespace: &str, name: &str, status: crds::VirtualMachineStatus) {
        let version = self.next_version();
        if let Some(vm) = self.virtual_machines.lock().unwrap().get_mut(&key(namespace, name)) {
            vm.status = Some(status);
            vm.metadata.resource_version = Some(version);
        }
    }

    /// Stored VM, if any
    pub fn virtual_machine(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        self.virtual_machines.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Stored secret, if any
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn virtual_machine_count(&self) -> usize {
        self.virtual_machines.lock().unwrap().len()
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    /// Delete calls received, with the grace period each one asked for
    pub fn deletions(&self) -> Vec<(String, String, u32)> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .map(|((namespace, name), grace)| (namespace.clone(), name.clone(), *grace))
            .collect()
    }

    fn check(&self, verb: InfraVerb) -> Result<(), InfraError> {
        if self.failures.lock().unwrap().contains(&verb) {
            return Err(injected_failure(verb));
        }
        Ok(())
    }

    fn next_version(&self) -> String {
        let mut next = self.next_resource_version.lock().unwrap();
        *next += 1;
        next.to_string()
    }

    fn stamp_new(&self, vm: &mut VirtualMachine, namespace: &str) {
        vm.metadata.namespace = Some(namespace.to_string());
        vm.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        vm.metadata.resource_version = Some(self.next_version());
    }
}

#[async_trait::async_trait]
impl InfraClusterClient for MockInfraClient {
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, InfraError> {
        self.check(InfraVerb::CreateVirtualMachine)?;
        let name = vm.name().to_string();
        if name.is_empty() {
            return Err(InfraError::InvalidObject("VirtualMachine has no name".to_string()));
        }
        if self.virtual_machines.lock().unwrap().contains_key(&key(namespace, &name)) {
            return Err(InfraError::AlreadyExists(format!("VirtualMachine {}/{}", namespace, name)));
        }
        let mut stored = vm.clone();
        self.stamp_new(&mut stored, namespace);
        self.virtual_machines
            .lock()
            .unwrap()
            .insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, InfraError> {
        self.check(InfraVerb::GetVirtualMachine)?;
        self.virtual_machine(namespace, name)
            .ok_or_else(|| InfraError::NotFound(format!("VirtualMachine {}/{}", namespace, name)))
    }

    async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, InfraError> {
        self.check(InfraVerb::UpdateVirtualMachine)?;
        let name = vm.name().to_string();
        let mut store = self.virtual_machines.lock().unwrap();
        let existing = store
            .get(&key(namespace, &name))
            .ok_or_else(|| InfraError::NotFound(format!("VirtualMachine {}/{}", namespace, name)))?;

        if vm.resource_version() != existing.resource_version() {
            return Err(InfraError::Conflict(format!(
                "VirtualMachine {}/{}: resourceVersion {} is stale",
                namespace,
                name,
                vm.resource_version()
            )));
        }

        let mut candidate = vm.clone();
        candidate.metadata.namespace = Some(namespace.to_string());
        candidate.metadata.uid = existing.metadata.uid.clone();
        // Status is a subresource; a replace of the main resource ignores it
        candidate.status = existing.status.clone();
        if candidate == *existing {
            return Ok(existing.clone());
        }

        drop(store);
        candidate.metadata.resource_version = Some(self.next_version());
        self.virtual_machines
            .lock()
            .unwrap()
            .insert(key(namespace, &name), candidate.clone());
        Ok(candidate)
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<(), InfraError> {
        self.check(InfraVerb::DeleteVirtualMachine)?;
        self.virtual_machines
            .lock()
            .unwrap()
            .remove(&key(namespace, name))
            .ok_or_else(|| InfraError::NotFound(format!("VirtualMachine {}/{}", namespace, name)))?;
        self.deleted
            .lock()
            .unwrap()
            .push((key(namespace, name), grace_period_seconds));
        Ok(())
    }

    async fn list_virtual_machines(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<VirtualMachine>, InfraError> {
        self.check(InfraVerb::ListVirtualMachines)?;
        // Equality-based selectors only (`a=b,c=d`)
        let wanted: Vec<(&str, &str)> = label_selector
            .unwrap_or_default()
            .split(',')
            .filter_map(|term| term.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        let mut items: Vec<VirtualMachine> = self
            .virtual_machines
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, vm)| vm)
            .filter(|vm| {
                let labels = vm.metadata.labels.clone().unwrap_or_default();
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(items)
    }

    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, InfraError> {
        self.check(InfraVerb::GetVirtualMachineInstance)?;
        self.instances
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| InfraError::NotFound(format!("VirtualMachineInstance {}/{}", namespace, name)))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, InfraError> {
        self.check(InfraVerb::CreateSecret)?;
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut store = self.secrets.lock().unwrap();
        if store.contains_key(&key(namespace, &name)) {
            return Err(InfraError::AlreadyExists(format!("Secret {}/{}", namespace, name)));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        store.insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }
}
