//! VirtualMachine CRD
//!
//! The infra-cluster virtual machine backing a `Machine`, including the
//! CDI data volume templates it boots from.

use crate::virtual_machine_instance::{ResourceRequirements, VirtualMachineInstanceSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// API version written on VMs built by this controller.
pub const VIRTUAL_MACHINE_API_VERSION: &str = "kubevirt.io/v1alpha3";

/// API version of the data volume templates.
pub const DATA_VOLUME_API_VERSION: &str = "cdi.kubevirt.io/v1alpha1";

/// Desired state of a KubeVirt VirtualMachine.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1alpha3",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<RunStrategy>,

    /// Instance template; absent on some hand-made VMs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<VirtualMachineInstanceTemplateSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_volume_templates: Vec<DataVolumeTemplateSpec>,
}

/// How KubeVirt keeps the instance of a VirtualMachine running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RunStrategy {
    /// An instance is always present
    Always,
    /// Restarted only when it fails
    RerunOnFailure,
    /// Started and stopped explicitly
    Manual,
    /// Never running
    Halted,
}

/// Embedded object metadata for templates (name, namespace, labels).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Template the VM stamps its instance from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualMachineInstanceTemplateSpec {
    #[serde(default)]
    pub metadata: TemplateMetadata,

    #[serde(default)]
    pub spec: VirtualMachineInstanceSpec,
}

/// CDI data volume created alongside the VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default)]
    pub metadata: TemplateMetadata,

    #[serde(default)]
    pub spec: DataVolumeSpec,
}

/// Source and storage of a data volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DataVolumeSpec {
    #[serde(default)]
    pub source: DataVolumeSourceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PersistentVolumeClaimSpec>,
}

/// Where a data volume is populated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DataVolumeSourceSpec {
    /// Clone source PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<DataVolumeSourcePvc>,
}

/// Existing PVC to clone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DataVolumeSourcePvc {
    pub name: String,
    pub namespace: String,
}

/// Subset of a PVC spec used by data volumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<PersistentVolumeAccessMode>,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// PVC access modes accepted for the boot volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum PersistentVolumeAccessMode {
    #[default]
    ReadWriteMany,
    ReadOnlyMany,
    ReadWriteOnce,
}

impl PersistentVolumeAccessMode {
    /// Every accepted mode, in the order they are reported to users.
    pub const ALL: [PersistentVolumeAccessMode; 3] = [
        PersistentVolumeAccessMode::ReadWriteMany,
        PersistentVolumeAccessMode::ReadOnlyMany,
        PersistentVolumeAccessMode::ReadWriteOnce,
    ];

    /// Name as written in the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistentVolumeAccessMode::ReadWriteMany => "ReadWriteMany",
            PersistentVolumeAccessMode::ReadOnlyMany => "ReadOnlyMany",
            PersistentVolumeAccessMode::ReadWriteOnce => "ReadWriteOnce",
        }
    }
}

impl fmt::Display for PersistentVolumeAccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistentVolumeAccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Observed state of a VirtualMachine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// VMI exists for this VM
    #[serde(default)]
    pub created: bool,

    /// VMI is up and ready
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VirtualMachineCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualMachineCondition {
    #[serde(rename = "type")]
    #[schemars(rename = "type")]
    pub condition_type: String,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VirtualMachine {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Optimistic-concurrency token, empty for objects not read from a server.
    pub fn resource_version(&self) -> &str {
        self.metadata.resource_version.as_deref().unwrap_or_default()
    }

    /// Machine type from the instance template, when there is a template.
    pub fn template_machine_type(&self) -> Option<&str> {
        self.spec.template.as_ref().map(|template| {
            template
                .spec
                .domain
                .machine
                .as_ref()
                .map(|machine| machine.machine_type.as_str())
                .unwrap_or_default()
        })
    }
}
