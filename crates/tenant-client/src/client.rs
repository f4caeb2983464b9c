//! Tenant cluster client
//!
//! Kube-backed implementation of [`TenantClusterClient`] using the
//! in-cluster client the controller runs with.

use crate::config_map::parse_flat_map;
use crate::error::TenantError;
use crate::merge_patch::{machine_patch, machine_status_patch};
use crate::tenant_trait::TenantClusterClient;
use crds::Machine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Tenant cluster API client
#[derive(Clone)]
pub struct KubeTenantClient {
    client: Client,
}

impl KubeTenantClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machines(&self, machine: &Machine) -> Api<Machine> {
        Api::namespaced(self.client.clone(), machine.namespace())
    }
}

fn map_kube_error(err: kube::Error, what: String) -> TenantError {
    match err {
        kube::Error::Api(ref status) if status.code == 404 => TenantError::NotFound(what),
        other => TenantError::Kube(other),
    }
}

#[async_trait::async_trait]
impl TenantClusterClient for KubeTenantClient {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret, TenantError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_kube_error(e, format!("Secret {}/{}", namespace, name)))
    }

    async fn get_config_map_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<BTreeMap<String, String>, TenantError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, format!("ConfigMap {}/{}", namespace, name)))?;
        let raw = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| TenantError::InvalidConfigMap {
                name: format!("{}/{}", namespace, name),
                reason: format!("missing key {}", key),
            })?;
        parse_flat_map(&format!("{}/{}", namespace, name), raw)
    }

    async fn patch_machine(&self, new: &Machine, old: &Machine) -> Result<(), TenantError> {
        let Some(patch) = machine_patch(new, old)? else {
            debug!("Machine {} unchanged, skipping patch", new.name());
            return Ok(());
        };
        debug!("Patching machine {}", new.name());
        self.machines(new)
            .patch(new.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, format!("Machine {}/{}", new.namespace(), new.name())))?;
        Ok(())
    }

    async fn status_patch_machine(&self, new: &Machine, old: &Machine) -> Result<(), TenantError> {
        let Some(patch) = machine_status_patch(new, old)? else {
            debug!("Machine {} status unchanged, skipping status patch", new.name());
            return Ok(());
        };
        debug!("Patching status of machine {}", new.name());
        self.machines(new)
            .patch_status(new.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, format!("Machine {}/{}", new.namespace(), new.name())))?;
        Ok(())
    }
}
