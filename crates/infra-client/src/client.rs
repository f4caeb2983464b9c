//! Infra cluster client
//!
//! Kube-backed implementation of [`InfraClusterClient`]. The client is
//! built from the kubeconfig stored in the tenant cluster, so it talks to a
//! different API server than the one the controller runs against.

use crate::error::InfraError;
use crate::infra_trait::InfraClusterClient;
use crds::{VirtualMachine, VirtualMachineInstance};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

/// Infra cluster API client
#[derive(Clone)]
pub struct KubeInfraClient {
    client: Client,
}

impl KubeInfraClient {
    /// Wrap an already configured kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from raw kubeconfig bytes (the `kubeconfig` key of the
    /// infra credentials secret).
    pub async fn from_kubeconfig(kubeconfig: &[u8]) -> Result<Self, InfraError> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| InfraError::Credentials(format!("kubeconfig is not valid UTF-8: {}", e)))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| InfraError::Credentials(format!("failed to parse kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| InfraError::Credentials(format!("failed to load kubeconfig: {}", e)))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn virtual_machines(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn virtual_machine_instances(&self, namespace: &str) -> Api<VirtualMachineInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map API status codes the callers branch on to dedicated variants
fn map_kube_error(err: kube::Error, what: String) -> InfraError {
    match err {
        kube::Error::Api(ref status) if status.code == 404 => InfraError::NotFound(what),
        kube::Error::Api(ref status) if status.code == 409 => {
            InfraError::AlreadyExists(format!("{}: {}", what, status.message))
        }
        other => InfraError::Kube(other),
    }
}

fn object_name<'a>(name: Option<&'a String>, kind: &str) -> Result<&'a str, InfraError> {
    name.map(String::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| InfraError::InvalidObject(format!("{} has no name", kind)))
}

#[async_trait::async_trait]
impl InfraClusterClient for KubeInfraClient {
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, InfraError> {
        let name = object_name(vm.metadata.name.as_ref(), "VirtualMachine")?;
        debug!("Creating VirtualMachine {}/{}", namespace, name);
        self.virtual_machines(namespace)
            .create(&PostParams::default(), vm)
            .await
            .map_err(|e| map_kube_error(e, format!("VirtualMachine {}/{}", namespace, name)))
    }

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, InfraError> {
        debug!("Getting VirtualMachine {}/{}", namespace, name);
        self.virtual_machines(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, format!("VirtualMachine {}/{}", namespace, name)))
    }

    async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, InfraError> {
        let name = object_name(vm.metadata.name.as_ref(), "VirtualMachine")?;
        debug!("Updating VirtualMachine {}/{}", namespace, name);
        self.virtual_machines(namespace)
            .replace(name, &PostParams::default(), vm)
            .await
            .map_err(|e| match map_kube_error(e, format!("VirtualMachine {}/{}", namespace, name)) {
                // A 409 on replace is a stale resourceVersion, not a duplicate
                InfraError::AlreadyExists(msg) => InfraError::Conflict(msg),
                other => other,
            })
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<(), InfraError> {
        debug!("Deleting VirtualMachine {}/{} (grace period {}s)", namespace, name, grace_period_seconds);
        let params = DeleteParams {
            grace_period_seconds: Some(grace_period_seconds),
            ..DeleteParams::default()
        };
        self.virtual_machines(namespace)
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, format!("VirtualMachine {}/{}", namespace, name)))
    }

    async fn list_virtual_machines(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<VirtualMachine>, InfraError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .virtual_machines(namespace)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, format!("VirtualMachines in {}", namespace)))?;
        Ok(list.items)
    }

    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, InfraError> {
        debug!("Getting VirtualMachineInstance {}/{}", namespace, name);
        self.virtual_machine_instances(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, format!("VirtualMachineInstance {}/{}", namespace, name)))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, InfraError> {
        let name = object_name(secret.metadata.name.as_ref(), "Secret")?;
        debug!("Creating Secret {}/{}", namespace, name);
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| map_kube_error(e, format!("Secret {}/{}", namespace, name)))
    }
}
