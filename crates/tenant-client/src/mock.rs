//! Mock TenantClusterClient for unit testing
//!
//! Serves secrets and config maps from memory and records every patch it
//! is asked to send, applying it to the stored machine when there is one.

use crate::config_map::parse_flat_map;
use crate::error::TenantError;
use crate::merge_patch::{machine_patch, machine_status_patch};
use crate::tenant_trait::TenantClusterClient;
use crds::Machine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

type Key = (String, String);

/// Which endpoint a recorded patch went to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchTarget {
    Machine,
    Status,
}

/// Client operations that can be made to fail with [`MockTenantClient::fail_on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantVerb {
    GetSecret,
    GetConfigMapValue,
    PatchMachine,
    StatusPatchMachine,
}

/// Mock tenant cluster client
#[derive(Clone, Default)]
pub struct MockTenantClient {
    secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    config_maps: Arc<Mutex<HashMap<Key, BTreeMap<String, String>>>>,
    machines: Arc<Mutex<HashMap<Key, Value>>>,
    patches: Arc<Mutex<Vec<(PatchTarget, Value)>>>,
    failures: Arc<Mutex<HashSet<TenantVerb>>>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn injected_failure(verb: TenantVerb) -> TenantError {
    TenantError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure for {:?}", verb),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

impl MockTenantClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `verb` fail with a 500
    pub fn fail_on(&self, verb: TenantVerb) {
        self.failures.lock().unwrap().insert(verb);
    }

    /// Add a secret with the given string data (for test setup)
    pub fn add_secret(&self, namespace: &str, name: &str, data: &[(&str, &[u8])]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };
        self.secrets.lock().unwrap().insert(key(namespace, name), secret);
    }

    /// Add a config map entry holding raw YAML (for test setup)
    pub fn add_config_map_value(&self, namespace: &str, name: &str, data_key: &str, raw: &str) {
        self.config_maps
            .lock()
            .unwrap()
            .entry(key(namespace, name))
            .or_default()
            .insert(data_key.to_string(), raw.to_string());
    }

    /// Track a machine so patches are applied to it
    pub fn add_machine(&self, machine: &Machine) {
        let value = serde_json::to_value(machine).unwrap();
        self.machines
            .lock()
            .unwrap()
            .insert(key(machine.namespace(), machine.name()), value);
    }

    /// Stored machine with every received patch applied
    pub fn machine(&self, namespace: &str, name: &str) -> Option<Machine> {
        self.machines
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Patches received, in order
    pub fn patches(&self) -> Vec<(PatchTarget, Value)> {
        self.patches.lock().unwrap().clone()
    }

    fn check(&self, verb: TenantVerb) -> Result<(), TenantError> {
        if self.failures.lock().unwrap().contains(&verb) {
            return Err(injected_failure(verb));
        }
        Ok(())
    }

    fn record(&self, target: PatchTarget, machine: &Machine, patch: Value) {
        if let Some(stored) = self
            .machines
            .lock()
            .unwrap()
            .get_mut(&key(machine.namespace(), machine.name()))
        {
            json_patch::merge(stored, &patch);
        }
        self.patches.lock().unwrap().push((target, patch));
    }
}

#[async_trait::async_trait]
impl TenantClusterClient for MockTenantClient {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret, TenantError> {
        self.check(TenantVerb::GetSecret)?;
        self.secrets
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| TenantError::NotFound(format!("Secret {}/{}", namespace, name)))
    }

    async fn get_config_map_value(
        &self,
        name: &str,
        namespace: &str,
        data_key: &str,
    ) -> Result<BTreeMap<String, String>, TenantError> {
        self.check(TenantVerb::GetConfigMapValue)?;
        let config_maps = self.config_maps.lock().unwrap();
        let data = config_maps
            .get(&key(namespace, name))
            .ok_or_else(|| TenantError::NotFound(format!("ConfigMap {}/{}", namespace, name)))?;
        let raw = data.get(data_key).ok_or_else(|| TenantError::InvalidConfigMap {
            name: format!("{}/{}", namespace, name),
            reason: format!("missing key {}", data_key),
        })?;
        parse_flat_map(&format!("{}/{}", namespace, name), raw)
    }

    async fn patch_machine(&self, new: &Machine, old: &Machine) -> Result<(), TenantError> {
        self.check(TenantVerb::PatchMachine)?;
        if let Some(patch) = machine_patch(new, old)? {
            self.record(PatchTarget::Machine, new, patch);
        }
        Ok(())
    }

    async fn status_patch_machine(&self, new: &Machine, old: &Machine) -> Result<(), TenantError> {
        self.check(TenantVerb::StatusPatchMachine)?;
        if let Some(patch) = machine_status_patch(new, old)? {
            self.record(PatchTarget::Status, new, patch);
        }
        Ok(())
    }
}
