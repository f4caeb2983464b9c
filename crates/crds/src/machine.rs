//! Machine CRD
//!
//! The tenant-cluster descriptor of a compute node. The group, version and
//! field names mirror `machine.openshift.io/v1beta1` so the controller can
//! read and patch the objects owned by the machine API operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label identifying the cluster a machine belongs to. Every machine
/// reconciled by this controller must carry it.
pub const MACHINE_CLUSTER_ID_LABEL: &str = "machine.openshift.io/cluster-api-cluster";

/// Annotation holding the derived instance state of the backing VM.
pub const MACHINE_INSTANCE_STATE_ANNOTATION: &str = "machine.openshift.io/instance-state";

/// Label holding the machine type of the backing VM template.
pub const MACHINE_INSTANCE_TYPE_LABEL: &str = "machine.openshift.io/instance-type";

/// Desired state of a Machine (`machine.openshift.io/v1beta1`).
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider-scoped identifier of the backing instance
    /// (`kubevirt://<namespace>/<name>` for this provider)
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    #[schemars(rename = "providerID")]
    pub provider_id: Option<String>,

    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpecSource,
}

/// Wrapper around the provider-specific configuration blob.
///
/// The blob is kept as raw JSON here; `crate::provider` owns its schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderSpecSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Observed state of a Machine as written back by the actuator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Last time the status was synchronized with the backing VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,

    /// Encoded `KubevirtMachineProviderStatus`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,

    /// Addresses the node is reachable on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Lifecycle phase maintained by the machine API operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// One address reported for the node backing a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MachineAddress {
    #[serde(rename = "type")]
    #[schemars(rename = "type")]
    pub address_type: NodeAddressType,

    pub address: String,
}

impl MachineAddress {
    /// Address of the given type.
    pub fn new(address_type: NodeAddressType, address: impl Into<String>) -> Self {
        Self {
            address_type,
            address: address.into(),
        }
    }
}

/// Node address kinds, serialized the way core/v1 `NodeAddress` spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NodeAddressType {
    Hostname,
    InternalIP,
    ExternalIP,
    InternalDNS,
    ExternalDNS,
}

impl Machine {
    /// Machine name, empty when the object has not been named yet.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Machine namespace, empty for objects read without one.
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Value of a label, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// Whether the machine has been linked to a backing instance.
    pub fn has_provider_id(&self) -> bool {
        self.spec
            .provider_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_provider_id_serializes_with_upper_case_id() {
        let spec = MachineSpec {
            provider_id: Some("kubevirt://ns/vm".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["providerID"], "kubevirt://ns/vm");
    }

    #[test]
    fn test_has_provider_id() {
        let mut machine = Machine {
            metadata: ObjectMeta::default(),
            spec: MachineSpec::default(),
            status: None,
        };
        assert!(!machine.has_provider_id());
        machine.spec.provider_id = Some(String::new());
        assert!(!machine.has_provider_id());
        machine.spec.provider_id = Some("kubevirt://a/b".to_string());
        assert!(machine.has_provider_id());
    }

    #[test]
    fn test_address_type_wire_format() {
        let address = MachineAddress::new(NodeAddressType::InternalDNS, "worker-0");
        let value = serde_json::to_value(&address).unwrap();
        assert_eq!(value, serde_json::json!({"type": "InternalDNS", "address": "worker-0"}));
    }
}
