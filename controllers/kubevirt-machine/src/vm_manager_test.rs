//! Unit tests for vm_manager module

use super::*;
use crate::address::Resolution;
use crate::machine_scope::{ignition_secret_name, IGNITION_SECRET_DATA_KEY};
use crate::test_utils::*;
use crds::{
    KubevirtMachineProviderSpec, MachineAddress, NodeAddressType, VirtualMachineInstance, VirtualMachineStatus,
    MACHINE_INSTANCE_STATE_ANNOTATION,
};
use infra_client::{InfraVerb, MockInfraClient};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::net::Ipv4Addr;

const USER_DATA: &[u8] = br#"{"ignition": {"version": "2.2.0"}}"#;

fn manager(infra: &MockInfraClient) -> VmManager {
    VmManager::new(Arc::new(infra.clone()), Arc::new(StaticResolver::default()))
}

fn scope() -> MachineScope {
    scope_with(&create_test_provider_spec())
}

fn scope_with(spec: &KubevirtMachineProviderSpec) -> MachineScope {
    MachineScope::new(create_test_machine("worker-0", spec), TEST_INFRA_NAMESPACE, TEST_INFRA_ID).unwrap()
}

fn instance(name: &str) -> VirtualMachineInstance {
    VirtualMachineInstance {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_INFRA_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Default::default(),
        status: None,
    }
}

/// Create the machine's VM through the manager and return the stored copy
async fn create_existing(infra: &MockInfraClient) -> VirtualMachine {
    manager(infra).create(&mut scope(), USER_DATA).await.unwrap();
    infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap()
}

#[tokio::test]
async fn test_create_builds_secret_and_vm() {
    let infra = MockInfraClient::new();
    let mut scope = scope();
    manager(&infra).create(&mut scope, USER_DATA).await.unwrap();

    let secret = infra.secret(TEST_INFRA_NAMESPACE, &ignition_secret_name("worker-0")).unwrap();
    let payload: serde_json::Value =
        serde_json::from_slice(&secret.data.unwrap()[IGNITION_SECRET_DATA_KEY].0).unwrap();
    assert_eq!(payload["ignition"]["version"], "2.2.0");
    assert_eq!(payload["storage"]["files"][0]["contents"]["source"], "data:,worker-0");

    let vm = infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap();
    assert_eq!(
        scope.machine().spec.provider_id.as_deref(),
        Some("kubevirt://tenant-infra/worker-0")
    );
    assert_eq!(
        scope.machine().metadata.annotations.as_ref().unwrap()[crate::machine_scope::VM_ID_ANNOTATION],
        vm.metadata.uid.unwrap()
    );
}

#[tokio::test]
async fn test_create_with_invalid_spec_makes_no_remote_call() {
    let infra = MockInfraClient::new();
    let spec = KubevirtMachineProviderSpec {
        source_pvc_name: String::new(),
        ..create_test_provider_spec()
    };
    let err = manager(&infra).create(&mut scope_with(&spec), USER_DATA).await.unwrap_err();
    assert!(matches!(err, VmError::Build { .. }));
    assert!(err.is_fatal());
    assert_eq!(infra.secret_count(), 0);
    assert_eq!(infra.virtual_machine_count(), 0);
}

#[tokio::test]
async fn test_create_rejects_non_object_payload() {
    let infra = MockInfraClient::new();
    let err = manager(&infra).create(&mut scope(), b"[]").await.unwrap_err();
    assert!(matches!(err, VmError::Ignition { .. }));
    assert_eq!(infra.secret_count(), 0);
}

#[tokio::test]
async fn test_create_secret_failure_stops_before_vm() {
    let infra = MockInfraClient::new();
    infra.fail_on(InfraVerb::CreateSecret);
    let err = manager(&infra).create(&mut scope(), USER_DATA).await.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("worker-0: Error during Create: failed to create ignition secret in infraCluster, with error: "));
    assert_eq!(infra.virtual_machine_count(), 0);
}

#[tokio::test]
async fn test_create_retry_reuses_secret() {
    let infra = MockInfraClient::new();
    infra.fail_on(InfraVerb::CreateVirtualMachine);
    assert!(manager(&infra).create(&mut scope(), USER_DATA).await.is_err());
    assert_eq!(infra.secret_count(), 1);

    infra.clear_failure(InfraVerb::CreateVirtualMachine);
    manager(&infra).create(&mut scope(), USER_DATA).await.unwrap();
    assert_eq!(infra.virtual_machine_count(), 1);
}

#[tokio::test]
async fn test_create_existing_vm_is_an_error() {
    let infra = MockInfraClient::new();
    create_existing(&infra).await;
    let err = manager(&infra).create(&mut scope(), USER_DATA).await.unwrap_err();
    assert!(matches!(err, VmError::Infra { source: InfraError::AlreadyExists(_), .. }));
}

#[tokio::test]
async fn test_create_with_instance_publishes_addresses() {
    let infra = MockInfraClient::new();
    infra.add_virtual_machine_instance(instance("worker-0"));
    let resolver = StaticResolver::default().with("worker-0", &[Ipv4Addr::new(10, 128, 0, 12)]);
    let manager = VmManager::new(Arc::new(infra.clone()), Arc::new(resolver));

    let mut scope = scope();
    manager.create(&mut scope, USER_DATA).await.unwrap();
    assert_eq!(
        scope.machine().status.as_ref().unwrap().addresses,
        vec![
            MachineAddress::new(NodeAddressType::InternalDNS, "worker-0"),
            MachineAddress::new(NodeAddressType::InternalIP, "10.128.0.12"),
        ]
    );
}

#[tokio::test]
async fn test_unresolvable_instance_keeps_dns_address() {
    let infra = MockInfraClient::new();
    infra.add_virtual_machine_instance(instance("worker-0"));
    let mut scope = scope();
    manager(&infra).create(&mut scope, USER_DATA).await.unwrap();
    assert_eq!(
        scope.machine().status.as_ref().unwrap().addresses,
        crate::address::node_addresses("worker-0", &Resolution::Unresolved)
    );
}

#[tokio::test]
async fn test_instance_lookup_failure_fails_sync() {
    let infra = MockInfraClient::new();
    infra.fail_on(InfraVerb::GetVirtualMachineInstance);
    let err = manager(&infra).create(&mut scope(), USER_DATA).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("Error during Create: failed to get vmi of the Machine"));
}

#[tokio::test]
async fn test_delete_missing_vm_is_success() {
    let infra = MockInfraClient::new();
    manager(&infra).delete(&scope()).await.unwrap();
    assert!(infra.deletions().is_empty());
}

#[tokio::test]
async fn test_delete_uses_grace_period() {
    let infra = MockInfraClient::new();
    create_existing(&infra).await;
    manager(&infra).delete(&scope()).await.unwrap();
    assert_eq!(
        infra.deletions(),
        vec![(TEST_INFRA_NAMESPACE.to_string(), "worker-0".to_string(), DELETE_GRACE_PERIOD_SECONDS)]
    );
}

#[tokio::test]
async fn test_delete_lookup_failure_propagates() {
    let infra = MockInfraClient::new();
    infra.fail_on(InfraVerb::GetVirtualMachine);
    let err = manager(&infra).delete(&scope()).await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("Error during Delete: failed to get Virtual Machine from infraCluster"));
}

#[tokio::test]
async fn test_update_missing_vm_is_an_error() {
    let infra = MockInfraClient::new();
    let err = manager(&infra).update(&mut scope()).await.unwrap_err();
    assert!(matches!(err, VmError::Infra { source: InfraError::NotFound(_), .. }));
}

#[tokio::test]
async fn test_update_without_change_is_not_reported() {
    let infra = MockInfraClient::new();
    create_existing(&infra).await;

    let mut scope = scope();
    let was_updated = manager(&infra).update(&mut scope).await.unwrap();
    assert!(!was_updated);
    assert_eq!(
        scope.machine().spec.provider_id.as_deref(),
        Some("kubevirt://tenant-infra/worker-0")
    );
}

#[tokio::test]
async fn test_update_with_changed_spec_is_reported() {
    let infra = MockInfraClient::new();
    let before = create_existing(&infra).await;

    let spec = KubevirtMachineProviderSpec {
        requested_cpu: 8,
        ..create_test_provider_spec()
    };
    let was_updated = manager(&infra).update(&mut scope_with(&spec)).await.unwrap();
    assert!(was_updated);

    let after = infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap();
    assert_ne!(after.resource_version(), before.resource_version());
    assert_eq!(
        after.spec.template.unwrap().spec.domain.resources.requests["cpu"],
        "8"
    );
}

#[tokio::test]
async fn test_update_preserves_observed_status() {
    let infra = MockInfraClient::new();
    create_existing(&infra).await;
    infra.set_virtual_machine_status(
        TEST_INFRA_NAMESPACE,
        "worker-0",
        VirtualMachineStatus {
            created: true,
            ready: true,
            ..Default::default()
        },
    );

    let mut scope = scope();
    let was_updated = manager(&infra).update(&mut scope).await.unwrap();
    assert!(!was_updated);

    let stored = infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap();
    let status = stored.status.unwrap();
    assert!(status.created && status.ready);
    assert_eq!(
        scope.machine().metadata.annotations.as_ref().unwrap()[MACHINE_INSTANCE_STATE_ANNOTATION],
        "vmWasCreatedAndReady"
    );
}

#[tokio::test]
async fn test_exists() {
    let infra = MockInfraClient::new();
    assert!(!manager(&infra).exists(&scope()).await.unwrap());

    create_existing(&infra).await;
    assert!(manager(&infra).exists(&scope()).await.unwrap());

    infra.fail_on(InfraVerb::GetVirtualMachine);
    let err = manager(&infra).exists(&scope()).await.unwrap_err();
    assert!(err.to_string().contains("Error during Exists: failed to get vm of the Machine"));
}
