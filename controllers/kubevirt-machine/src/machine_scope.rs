//! Per-reconcile machine context.
//!
//! A `MachineScope` is built at the start of every actuator call from the
//! machine being reconciled and the bootstrap configuration, and dropped at
//! the end. It owns the pure mapping between the two worlds:
//!
//! - machine + provider spec -> desired `VirtualMachine` and ignition `Secret`
//! - observed `VirtualMachine` (+ instance addresses) -> machine fields
//!
//! No remote I/O happens here. The scope works on its own copy of the
//! machine; the actuator diffs that copy against the snapshot it took
//! before reconciling and patches the difference.

use crate::error::ConfigurationError;
use crate::quantity::is_valid_quantity;
use chrono::{DateTime, TimeDelta, Utc};
use crds::{
    CloudInitConfigDriveSource, DataVolumeSource, DataVolumeSourcePvc, DataVolumeSourceSpec, DataVolumeSpec,
    DataVolumeTemplateSpec, Devices, Disk, DiskTarget, DomainSpec, Interface, InterfaceBridge,
    KubevirtMachineProviderSpec, KubevirtMachineProviderStatus, LocalObjectReference, Machine, MachineAddress,
    MultusNetwork, Network, PersistentVolumeAccessMode, PersistentVolumeClaimSpec, ResourceRequirements, RunStrategy,
    TemplateMetadata, VirtualMachine, VirtualMachineInstanceSpec, VirtualMachineInstanceTemplateSpec,
    VirtualMachineSpec, VirtualMachineStatus, Volume, DATA_VOLUME_API_VERSION, MACHINE_CLUSTER_ID_LABEL,
    MACHINE_INSTANCE_STATE_ANNOTATION, MACHINE_INSTANCE_TYPE_LABEL,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, info_span, Span};

/// Label carrying the infra ID on everything created in the infra cluster
pub const INFRA_CLUSTER_ID_LABEL: &str = "kubevirt.io/cluster-id";

/// Annotation carrying the uid of the backing VM
pub const VM_ID_ANNOTATION: &str = "VmId";

/// Key of the ignition payload inside the infra ignition secret
pub const IGNITION_SECRET_DATA_KEY: &str = "userdata";

const DEFAULT_REQUESTED_MEMORY: &str = "2048M";
const DEFAULT_REQUESTED_STORAGE: &str = "35Gi";
const DATA_VOLUME_DISK_NAME: &str = "datavolumedisk1";
const CLOUD_INIT_DISK_NAME: &str = "cloudinitdisk";
const BOOT_VOLUME_SUFFIX: &str = "bootvolume";
const DISK_BUS: &str = "virtio";
const MAIN_NETWORK_NAME: &str = "main";
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 600;

/// Instance state published on the machine, derived from the VM status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    NotCreated,
    CreatedNotReady,
    CreatedAndReady,
}

impl InstanceState {
    /// `ready` is only meaningful once the VM is created; a VM reporting
    /// ready without being created counts as not created.
    pub fn from_status(status: Option<&VirtualMachineStatus>) -> Self {
        match status {
            Some(VirtualMachineStatus { created: true, ready: true, .. }) => InstanceState::CreatedAndReady,
            Some(VirtualMachineStatus { created: true, .. }) => InstanceState::CreatedNotReady,
            _ => InstanceState::NotCreated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::NotCreated => "vmNotCreated",
            InstanceState::CreatedNotReady => "vmWasCreatedButNotReady",
            InstanceState::CreatedAndReady => "vmWasCreatedAndReady",
        }
    }
}

/// `kubevirt://<namespace>/<name>`
pub fn provider_id(namespace: &str, name: &str) -> String {
    format!("kubevirt://{}/{}", namespace, name)
}

pub fn ignition_secret_name(vm_name: &str) -> String {
    format!("{}-ignition", vm_name)
}

pub fn boot_volume_name(vm_name: &str) -> String {
    format!("{}-{}", vm_name, BOOT_VOLUME_SUFFIX)
}

/// Labels put on every object created in the infra cluster
pub fn base_labels(infra_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MACHINE_CLUSTER_ID_LABEL.to_string(), infra_id.to_string()),
        (INFRA_CLUSTER_ID_LABEL.to_string(), infra_id.to_string()),
    ])
}

/// Machine fields derived from an observed VM.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSync {
    pub provider_id: String,
    pub vm_id: String,
    pub instance_state: InstanceState,
    /// `None` when the VM has no template; the label is then left alone
    pub instance_type: Option<String>,
    pub provider_status: serde_json::Value,
    /// `None` when there is no instance to take addresses from
    pub addresses: Option<Vec<MachineAddress>>,
}

/// Per-reconcile machine context.
#[derive(Debug)]
pub struct MachineScope {
    machine: Machine,
    provider_spec: KubevirtMachineProviderSpec,
    infra_namespace: String,
    infra_id: String,
    span: Span,
}

impl MachineScope {
    /// Build the scope for one reconcile pass.
    ///
    /// Fails when the machine has no cluster ID label or its provider spec
    /// cannot be decoded.
    pub fn new(machine: Machine, infra_namespace: &str, infra_id: &str) -> Result<Self, ConfigurationError> {
        if machine.label(MACHINE_CLUSTER_ID_LABEL).unwrap_or_default().is_empty() {
            return Err(ConfigurationError::MissingClusterLabel {
                machine: machine.name().to_string(),
            });
        }
        let provider_spec = KubevirtMachineProviderSpec::from_raw(machine.spec.provider_spec.value.as_ref())
            .map_err(ConfigurationError::ProviderSpec)?;
        let span = info_span!("machine_scope", machine = %machine.name());

        Ok(Self {
            machine,
            provider_spec,
            infra_namespace: infra_namespace.to_string(),
            infra_id: infra_id.to_string(),
            span,
        })
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }

    pub fn machine_name(&self) -> &str {
        self.machine.name()
    }

    pub fn machine_namespace(&self) -> &str {
        self.machine.namespace()
    }

    pub fn infra_namespace(&self) -> &str {
        &self.infra_namespace
    }

    pub fn provider_spec(&self) -> &KubevirtMachineProviderSpec {
        &self.provider_spec
    }

    /// Tenant secret holding this machine's ignition user data
    pub fn ignition_secret_name(&self) -> &str {
        &self.provider_spec.ignition_secret_name
    }

    /// Span every operation on this machine runs in
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Whether a status sync may run now.
    ///
    /// Never before the machine has a provider ID. Otherwise allowed when
    /// the status was never synced or the last sync is more than `interval`
    /// in the past.
    pub fn update_allowed(&self, interval: Duration) -> bool {
        self.update_allowed_at(interval, Utc::now())
    }

    pub fn update_allowed_at(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        if !self.machine.has_provider_id() {
            return false;
        }
        let Some(last_updated) = self.machine.status.as_ref().and_then(|status| status.last_updated) else {
            return true;
        };
        TimeDelta::from_std(interval)
            .ok()
            .and_then(|delta| last_updated.checked_add_signed(delta))
            .is_some_and(|earliest| now > earliest)
    }

    /// Build the VM this machine should be backed by.
    pub fn build_desired_virtual_machine(&self) -> Result<VirtualMachine, ConfigurationError> {
        self.assert_mandatory_fields()?;
        let access_mode = self.access_mode()?;
        let memory = self.quantity("RequestedMemory", &self.provider_spec.requested_memory, DEFAULT_REQUESTED_MEMORY)?;
        let storage = self.quantity("RequestedStorage", &self.provider_spec.requested_storage, DEFAULT_REQUESTED_STORAGE)?;

        let name = self.machine_name();
        let mut labels = base_labels(&self.infra_id);
        if let Some(machine_labels) = &self.machine.metadata.labels {
            labels.extend(machine_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Ok(VirtualMachine {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.infra_namespace.clone()),
                labels: Some(labels),
                annotations: self.machine.metadata.annotations.clone(),
                ..Default::default()
            },
            spec: VirtualMachineSpec {
                running: None,
                run_strategy: Some(RunStrategy::Always),
                template: Some(self.build_instance_template(memory)),
                data_volume_templates: vec![self.build_boot_volume_template(storage, access_mode)],
            },
            status: None,
        })
    }

    /// Infra-cluster secret carrying the (already augmented) ignition payload.
    pub fn build_ignition_secret(&self, user_data: Vec<u8>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(ignition_secret_name(self.machine_name())),
                namespace: Some(self.infra_namespace.clone()),
                labels: Some(base_labels(&self.infra_id)),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                IGNITION_SECRET_DATA_KEY.to_string(),
                ByteString(user_data),
            )])),
            ..Default::default()
        }
    }

    /// Compute the machine fields implied by an observed VM.
    pub fn plan_sync(
        &self,
        vm: &VirtualMachine,
        addresses: Option<Vec<MachineAddress>>,
    ) -> Result<MachineSync, ConfigurationError> {
        let provider_status = KubevirtMachineProviderStatus::new(vm.status.clone().unwrap_or_default())
            .to_raw()
            .map_err(ConfigurationError::ProviderStatus)?;

        Ok(MachineSync {
            provider_id: provider_id(vm.namespace(), vm.name()),
            vm_id: vm.metadata.uid.clone().unwrap_or_default(),
            instance_state: InstanceState::from_status(vm.status.as_ref()),
            instance_type: vm.template_machine_type().map(str::to_string),
            provider_status,
            addresses,
        })
    }

    /// Write planned fields onto the scope's machine copy.
    pub fn apply_sync(&mut self, sync: MachineSync) {
        let _entered = self.span.clone().entered();
        let machine = &mut self.machine;

        if machine.spec.provider_id.as_deref() == Some(sync.provider_id.as_str()) {
            debug!("providerID already synced: {}", sync.provider_id);
        } else {
            info!("Setting providerID to {}", sync.provider_id);
            machine.spec.provider_id = Some(sync.provider_id);
        }

        let annotations = machine.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(VM_ID_ANNOTATION.to_string(), sync.vm_id);
        annotations.insert(
            MACHINE_INSTANCE_STATE_ANNOTATION.to_string(),
            sync.instance_state.as_str().to_string(),
        );
        if let Some(instance_type) = sync.instance_type {
            machine
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(MACHINE_INSTANCE_TYPE_LABEL.to_string(), instance_type);
        }

        let status = machine.status.get_or_insert_with(Default::default);
        status.provider_status = Some(sync.provider_status);
        if let Some(addresses) = sync.addresses {
            debug!("Setting addresses to {:?}", addresses);
            status.addresses = addresses;
        }
    }

    /// Fold an observed VM (and the addresses of its instance, when there
    /// is one) back into the machine.
    pub fn sync_machine(
        &mut self,
        vm: &VirtualMachine,
        addresses: Option<Vec<MachineAddress>>,
    ) -> Result<(), ConfigurationError> {
        let sync = self.plan_sync(vm, addresses)?;
        self.apply_sync(sync);
        Ok(())
    }

    fn assert_mandatory_fields(&self) -> Result<(), ConfigurationError> {
        let spec = &self.provider_spec;
        let missing = [
            ("SourcePvcName", &spec.source_pvc_name),
            ("IgnitionSecretName", &spec.ignition_secret_name),
            ("NetworkName", &spec.network_name),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        match missing {
            Some((field, _)) => Err(ConfigurationError::MissingField {
                machine: self.machine_name().to_string(),
                field,
            }),
            None => Ok(()),
        }
    }

    fn access_mode(&self) -> Result<PersistentVolumeAccessMode, ConfigurationError> {
        let raw = &self.provider_spec.persistent_volume_access_mode;
        if raw.is_empty() {
            return Ok(PersistentVolumeAccessMode::default());
        }
        raw.parse().map_err(|value| ConfigurationError::InvalidAccessMode {
            machine: self.machine_name().to_string(),
            value,
        })
    }

    fn quantity(&self, field: &'static str, value: &str, default: &str) -> Result<String, ConfigurationError> {
        if value.is_empty() {
            return Ok(default.to_string());
        }
        if !is_valid_quantity(value) {
            return Err(ConfigurationError::InvalidQuantity {
                machine: self.machine_name().to_string(),
                field,
                value: value.to_string(),
            });
        }
        Ok(value.to_string())
    }

    fn build_instance_template(&self, memory: String) -> VirtualMachineInstanceTemplateSpec {
        let name = self.machine_name();

        let mut requests = BTreeMap::from([("memory".to_string(), memory)]);
        if self.provider_spec.requested_cpu != 0 {
            requests.insert("cpu".to_string(), self.provider_spec.requested_cpu.to_string());
        }

        let disk = |disk_name: &str| Disk {
            name: disk_name.to_string(),
            disk: Some(DiskTarget {
                bus: Some(DISK_BUS.to_string()),
            }),
        };

        VirtualMachineInstanceTemplateSpec {
            metadata: TemplateMetadata {
                labels: BTreeMap::from([
                    ("kubevirt.io/vm".to_string(), name.to_string()),
                    ("name".to_string(), name.to_string()),
                ]),
                ..Default::default()
            },
            spec: VirtualMachineInstanceSpec {
                termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                domain: DomainSpec {
                    resources: ResourceRequirements { requests },
                    machine: None,
                    devices: Devices {
                        disks: vec![disk(DATA_VOLUME_DISK_NAME), disk(CLOUD_INIT_DISK_NAME)],
                        interfaces: vec![Interface {
                            name: MAIN_NETWORK_NAME.to_string(),
                            bridge: Some(InterfaceBridge {}),
                        }],
                    },
                },
                volumes: vec![
                    Volume {
                        name: DATA_VOLUME_DISK_NAME.to_string(),
                        data_volume: Some(DataVolumeSource {
                            name: boot_volume_name(name),
                        }),
                        cloud_init_config_drive: None,
                    },
                    Volume {
                        name: CLOUD_INIT_DISK_NAME.to_string(),
                        data_volume: None,
                        cloud_init_config_drive: Some(CloudInitConfigDriveSource {
                            user_data_secret_ref: Some(LocalObjectReference {
                                name: ignition_secret_name(name),
                            }),
                        }),
                    },
                ],
                networks: vec![Network {
                    name: MAIN_NETWORK_NAME.to_string(),
                    multus: Some(MultusNetwork {
                        network_name: self.provider_spec.network_name.clone(),
                    }),
                }],
            },
        }
    }

    fn build_boot_volume_template(
        &self,
        storage: String,
        access_mode: PersistentVolumeAccessMode,
    ) -> DataVolumeTemplateSpec {
        let storage_class_name = Some(self.provider_spec.storage_class_name.clone()).filter(|name| !name.is_empty());

        DataVolumeTemplateSpec {
            api_version: Some(DATA_VOLUME_API_VERSION.to_string()),
            metadata: TemplateMetadata {
                name: Some(boot_volume_name(self.machine_name())),
                namespace: Some(self.infra_namespace.clone()),
                ..Default::default()
            },
            spec: DataVolumeSpec {
                source: DataVolumeSourceSpec {
                    pvc: Some(DataVolumeSourcePvc {
                        name: self.provider_spec.source_pvc_name.clone(),
                        namespace: self.infra_namespace.clone(),
                    }),
                },
                pvc: Some(PersistentVolumeClaimSpec {
                    access_modes: vec![access_mode],
                    resources: ResourceRequirements {
                        requests: BTreeMap::from([("storage".to_string(), storage)]),
                    },
                    storage_class_name,
                }),
            },
        }
    }
}

#[cfg(test)]
#[path = "machine_scope_test.rs"]
mod machine_scope_test;
