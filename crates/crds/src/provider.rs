//! Kubevirt provider spec and status
//!
//! Versioned schema of the provider blobs embedded in a `Machine`.
//! Decoding goes through [`VersionedProviderSpec`], tagged on `apiVersion`,
//! so an unknown schema version is rejected instead of half-parsed.

use crate::virtual_machine::VirtualMachineStatus;
use serde::{Deserialize, Serialize};

/// Schema version of the provider spec and status blobs.
pub const PROVIDER_API_VERSION: &str = "kubevirtproviderconfig.openshift.io/v1alpha1";

/// Kind of the provider spec blob.
pub const PROVIDER_SPEC_KIND: &str = "KubevirtMachineProviderSpec";
/// Kind of the provider status blob.
pub const PROVIDER_STATUS_KIND: &str = "KubevirtMachineProviderStatus";

/// Decoded configuration for one machine.
///
/// Empty strings (and `requested_cpu == 0`) mean "unset"; defaulting and
/// validation happen when the desired VM is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderSpec {
    /// PVC cloned into the boot volume
    #[serde(default)]
    pub source_pvc_name: String,

    /// Tenant secret holding the ignition user data
    #[serde(default)]
    pub ignition_secret_name: String,

    /// Multus network the VM is attached to
    #[serde(default)]
    pub network_name: String,

    #[serde(default)]
    pub requested_memory: String,

    #[serde(default, rename = "requestedCPU")]
    pub requested_cpu: u32,

    #[serde(default)]
    pub requested_storage: String,

    #[serde(default)]
    pub storage_class_name: String,

    #[serde(default)]
    pub persistent_volume_access_mode: String,
}

/// Provider spec blob tagged by its API version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "apiVersion")]
pub enum VersionedProviderSpec {
    #[serde(rename = "kubevirtproviderconfig.openshift.io/v1alpha1")]
    V1alpha1(KubevirtMachineProviderSpec),
}

impl KubevirtMachineProviderSpec {
    /// Decode the raw provider spec attached to a machine.
    ///
    /// A machine without a provider spec decodes to the empty spec; the
    /// mandatory-field checks reject it later with a precise message.
    pub fn from_raw(raw: Option<&serde_json::Value>) -> Result<Self, serde_json::Error> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        match VersionedProviderSpec::deserialize(raw)? {
            VersionedProviderSpec::V1alpha1(spec) => Ok(spec),
        }
    }

    /// Encode as a raw provider spec (`apiVersion` + `kind` + fields).
    pub fn to_raw(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut raw = serde_json::to_value(VersionedProviderSpec::V1alpha1(self.clone()))?;
        if let Some(object) = raw.as_object_mut() {
            object.insert("kind".to_string(), PROVIDER_SPEC_KIND.into());
        }
        Ok(raw)
    }
}

/// Observed provider state written back onto the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderStatus {
    pub api_version: String,
    pub kind: String,

    #[serde(default)]
    pub virtual_machine_status: VirtualMachineStatus,
}

impl KubevirtMachineProviderStatus {
    /// Status blob wrapping the observed VM status.
    pub fn new(virtual_machine_status: VirtualMachineStatus) -> Self {
        Self {
            api_version: PROVIDER_API_VERSION.to_string(),
            kind: PROVIDER_STATUS_KIND.to_string(),
            virtual_machine_status,
        }
    }

    /// Encode for `providerStatus`.
    pub fn to_raw(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a `providerStatus` blob.
    pub fn from_raw(raw: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_v1alpha1_spec() {
        let raw = json!({
            "apiVersion": PROVIDER_API_VERSION,
            "kind": PROVIDER_SPEC_KIND,
            "sourcePvcName": "rhcos",
            "ignitionSecretName": "worker-user-data",
            "networkName": "multus-net",
            "requestedCPU": 4,
        });
        let spec = KubevirtMachineProviderSpec::from_raw(Some(&raw)).unwrap();
        assert_eq!(spec.source_pvc_name, "rhcos");
        assert_eq!(spec.requested_cpu, 4);
        assert!(spec.requested_memory.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let raw = json!({"apiVersion": "kubevirtproviderconfig.openshift.io/v9", "sourcePvcName": "x"});
        assert!(KubevirtMachineProviderSpec::from_raw(Some(&raw)).is_err());
    }

    #[test]
    fn test_decode_missing_spec_is_empty() {
        let spec = KubevirtMachineProviderSpec::from_raw(None).unwrap();
        assert_eq!(spec, KubevirtMachineProviderSpec::default());
    }

    #[test]
    fn test_encoded_spec_carries_version_and_kind() {
        let raw = KubevirtMachineProviderSpec {
            network_name: "net".to_string(),
            ..Default::default()
        }
        .to_raw()
        .unwrap();
        assert_eq!(raw["apiVersion"], PROVIDER_API_VERSION);
        assert_eq!(raw["kind"], PROVIDER_SPEC_KIND);
        assert_eq!(raw["networkName"], "net");
    }

    #[test]
    fn test_status_encoding() {
        let status = KubevirtMachineProviderStatus::new(VirtualMachineStatus {
            created: true,
            ..Default::default()
        });
        let raw = status.to_raw().unwrap();
        assert_eq!(raw["kind"], PROVIDER_STATUS_KIND);
        assert_eq!(raw["virtualMachineStatus"]["created"], true);
        assert_eq!(KubevirtMachineProviderStatus::from_raw(&raw).unwrap(), status);
    }
}
