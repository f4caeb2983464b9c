//! Test utilities for unit testing the scope, VM manager and actuator
//!
//! This module provides helpers for creating test machines and the
//! in-memory collaborators the actuator is wired with.

#[cfg(test)]
use crate::address::{AddressResolver, Resolution};
#[cfg(test)]
use crds::{KubevirtMachineProviderSpec, Machine, MachineSpec, ProviderSpecSource, MACHINE_CLUSTER_ID_LABEL};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::net::Ipv4Addr;

#[cfg(test)]
pub const TEST_MACHINE_NAMESPACE: &str = "openshift-machine-api";
#[cfg(test)]
pub const TEST_INFRA_NAMESPACE: &str = "tenant-infra";
#[cfg(test)]
pub const TEST_INFRA_ID: &str = "mycluster-x7k2p";

/// Provider spec with every mandatory field set
#[cfg(test)]
pub fn create_test_provider_spec() -> KubevirtMachineProviderSpec {
    KubevirtMachineProviderSpec {
        source_pvc_name: "rhcos-pvc".to_string(),
        ignition_secret_name: "worker-user-data".to_string(),
        network_name: "multus-net".to_string(),
        ..Default::default()
    }
}

/// Helper to create a test Machine carrying the cluster label
#[cfg(test)]
pub fn create_test_machine(name: &str, provider_spec: &KubevirtMachineProviderSpec) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_MACHINE_NAMESPACE.to_string()),
            resource_version: Some("1".to_string()),
            labels: Some(BTreeMap::from([(
                MACHINE_CLUSTER_ID_LABEL.to_string(),
                TEST_INFRA_ID.to_string(),
            )])),
            ..Default::default()
        },
        spec: MachineSpec {
            provider_id: None,
            provider_spec: ProviderSpecSource {
                value: Some(provider_spec.to_raw().unwrap()),
            },
        },
        status: None,
    }
}

/// Resolver answering from a fixed table; unknown names are unresolved
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<Ipv4Addr>>,
}

#[cfg(test)]
impl StaticResolver {
    pub fn with(mut self, hostname: &str, ips: &[Ipv4Addr]) -> Self {
        self.entries.insert(hostname.to_string(), ips.to_vec());
        self
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Resolution {
        match self.entries.get(hostname) {
            Some(ips) => Resolution::Resolved(ips.clone()),
            None => Resolution::Unresolved,
        }
    }
}
