//! Unit tests for actuator module

use super::*;
use crate::events::{RecordedEvent, RecordingEventPublisher};
use crate::test_utils::*;
use crds::{KubevirtMachineProviderSpec, MachineStatus, VirtualMachineStatus, MACHINE_INSTANCE_STATE_ANNOTATION};
use infra_client::{InfraVerb, MockInfraClient};
use tenant_client::{MockTenantClient, PatchTarget, TenantVerb};

const USER_DATA: &[u8] = br#"{"ignition": {"version": "3.1.0"}}"#;

struct Fixture {
    infra: MockInfraClient,
    tenant: MockTenantClient,
    events: Arc<RecordingEventPublisher>,
    actuator: Actuator,
}

fn fixture() -> Fixture {
    let infra = MockInfraClient::new();
    let tenant = MockTenantClient::new();
    tenant.add_secret(TEST_MACHINE_NAMESPACE, "worker-user-data", &[(USER_DATA_SECRET_KEY, USER_DATA)]);
    let events = Arc::new(RecordingEventPublisher::default());
    let actuator = Actuator::new(
        VmManager::new(Arc::new(infra.clone()), Arc::new(StaticResolver::default())),
        Arc::new(tenant.clone()),
        events.clone(),
        BootstrapConfig {
            infra_namespace: TEST_INFRA_NAMESPACE.to_string(),
            infra_id: TEST_INFRA_ID.to_string(),
        },
    );
    Fixture {
        infra,
        tenant,
        events,
        actuator,
    }
}

fn machine() -> Machine {
    create_test_machine("worker-0", &create_test_provider_spec())
}

fn event(warning: bool, reason: &str, action: &str, note: &str) -> RecordedEvent {
    RecordedEvent {
        object: Some("worker-0".to_string()),
        warning,
        reason: reason.to_string(),
        action: action.to_string(),
        note: Some(note.to_string()),
    }
}

#[tokio::test]
async fn test_create_patches_machine_and_records_event() {
    let f = fixture();
    let machine = machine();
    f.tenant.add_machine(&machine);

    f.actuator.create(&machine).await.unwrap();

    assert_eq!(f.infra.virtual_machine_count(), 1);
    let stored = f.tenant.machine(TEST_MACHINE_NAMESPACE, "worker-0").unwrap();
    assert_eq!(stored.spec.provider_id.as_deref(), Some("kubevirt://tenant-infra/worker-0"));
    assert_eq!(
        stored.metadata.annotations.as_ref().unwrap()[MACHINE_INSTANCE_STATE_ANNOTATION],
        "vmNotCreated"
    );
    assert!(stored.status.unwrap().last_updated.is_some());

    let targets: Vec<PatchTarget> = f.tenant.patches().into_iter().map(|(target, _)| target).collect();
    assert_eq!(targets, vec![PatchTarget::Machine, PatchTarget::Status]);
    assert_eq!(
        f.events.events(),
        vec![event(false, "Create", "Create", "Created Machine worker-0")]
    );
}

#[tokio::test]
async fn test_create_without_user_data_secret_is_fatal() {
    let f = fixture();
    let spec = KubevirtMachineProviderSpec {
        ignition_secret_name: "missing-user-data".to_string(),
        ..create_test_provider_spec()
    };
    let machine = create_test_machine("worker-0", &spec);

    let err = f.actuator.create(&machine).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(
        err.to_string(),
        "worker-0: kubevirt wrapper failed to Create machine: Tenant-cluster secret openshift-machine-api/missing-user-data not found"
    );
    assert_eq!(f.infra.virtual_machine_count(), 0);
    assert!(f.tenant.patches().is_empty());

    let events = f.events.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].warning);
    assert_eq!(events[0].reason, "FailedCreate");
    assert_eq!(events[0].note.as_deref(), Some(err.to_string().as_str()));
}

#[tokio::test]
async fn test_create_without_user_data_key_is_fatal() {
    let f = fixture();
    f.tenant.add_secret(TEST_MACHINE_NAMESPACE, "worker-user-data", &[("disableTemplating", b"true")]);

    let err = f.actuator.create(&machine()).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().ends_with("doesn't contain the key userData"));
}

#[tokio::test]
async fn test_create_failure_leaves_secret_and_sends_no_empty_patch() {
    let f = fixture();
    f.infra.fail_on(InfraVerb::CreateVirtualMachine);
    let machine = machine();

    let err = f.actuator.create(&machine).await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("failed to create Virtual Machine in infraCluster"));
    // The ignition secret was created before the failing step
    assert_eq!(f.infra.secret_count(), 1);
    // Nothing was synced, so the write-back has nothing to send
    assert!(f.tenant.patches().is_empty());
    assert_eq!(f.events.events()[0].reason, "FailedCreate");
}

#[tokio::test]
async fn test_patch_failure_overrides_success() {
    let f = fixture();
    f.tenant.fail_on(TenantVerb::PatchMachine);

    let err = f.actuator.create(&machine()).await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Reconcile {
            operation: Operation::Create,
            source: ReconcileFailure::Tenant(_),
            ..
        }
    ));
    // The VM exists even though the machine could not be written back
    assert_eq!(f.infra.virtual_machine_count(), 1);
    assert!(f.events.events()[0].warning);
}

#[tokio::test]
async fn test_status_patch_failure_is_reported() {
    let f = fixture();
    f.tenant.fail_on(TenantVerb::StatusPatchMachine);

    let err = f.actuator.create(&machine()).await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Reconcile {
            source: ReconcileFailure::Tenant(_),
            ..
        }
    ));
    let targets: Vec<PatchTarget> = f.tenant.patches().into_iter().map(|(target, _)| target).collect();
    assert_eq!(targets, vec![PatchTarget::Machine]);
}

#[tokio::test]
async fn test_update_without_change_records_no_event() {
    let f = fixture();
    let machine = machine();
    f.actuator.create(&machine).await.unwrap();
    let created = f.tenant.patches().len();

    // Second reconcile of the already published machine
    let mut current = machine.clone();
    current.spec.provider_id = Some("kubevirt://tenant-infra/worker-0".to_string());
    f.actuator.update(&current).await.unwrap();

    assert_eq!(f.events.events().len(), 1);
    assert!(f.tenant.patches().len() > created);
}

#[tokio::test]
async fn test_update_with_changed_vm_records_event() {
    let f = fixture();
    f.actuator.create(&machine()).await.unwrap();

    let spec = KubevirtMachineProviderSpec {
        requested_memory: "4096M".to_string(),
        ..create_test_provider_spec()
    };
    f.actuator.update(&create_test_machine("worker-0", &spec)).await.unwrap();

    let events = f.events.events();
    assert_eq!(events.last(), Some(&event(false, "Update", "Update", "Updated Machine worker-0")));
}

#[tokio::test]
async fn test_update_publishes_observed_state() {
    let f = fixture();
    f.actuator.create(&machine()).await.unwrap();
    f.infra.set_virtual_machine_status(
        TEST_INFRA_NAMESPACE,
        "worker-0",
        VirtualMachineStatus {
            created: true,
            ready: false,
            ..Default::default()
        },
    );
    let machine = machine();
    f.tenant.add_machine(&machine);

    f.actuator.update(&machine).await.unwrap();
    let stored = f.tenant.machine(TEST_MACHINE_NAMESPACE, "worker-0").unwrap();
    assert_eq!(
        stored.metadata.annotations.as_ref().unwrap()[MACHINE_INSTANCE_STATE_ANNOTATION],
        "vmWasCreatedButNotReady"
    );
}

#[tokio::test]
async fn test_update_missing_vm_records_warning() {
    let f = fixture();
    let err = f.actuator.update(&machine()).await.unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(f.events.events()[0].reason, "FailedUpdate");
}

#[tokio::test]
async fn test_unchanged_machine_sends_no_patch() {
    let f = fixture();
    let mut machine = machine();
    machine.status = Some(MachineStatus::default());
    f.actuator.patch_machine(&machine, &machine).await.unwrap();
    assert!(f.tenant.patches().is_empty());
}

#[tokio::test]
async fn test_delete_records_event() {
    let f = fixture();
    let machine = machine();
    f.actuator.create(&machine).await.unwrap();

    f.actuator.delete(&machine).await.unwrap();
    assert_eq!(f.infra.deletions().len(), 1);
    assert_eq!(
        f.events.events().last(),
        Some(&event(false, "Delete", "Delete", "Deleted machine worker-0"))
    );
}

#[tokio::test]
async fn test_delete_failure_records_warning() {
    let f = fixture();
    f.infra.fail_on(InfraVerb::GetVirtualMachine);
    let err = f.actuator.delete(&machine()).await.unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(f.events.events()[0].reason, "FailedDelete");
}

#[tokio::test]
async fn test_exists_records_no_event() {
    let f = fixture();
    assert!(!f.actuator.exists(&machine()).await.unwrap());
    f.actuator.create(&machine()).await.unwrap();
    assert!(f.actuator.exists(&machine()).await.unwrap());

    f.infra.fail_on(InfraVerb::GetVirtualMachine);
    let err = f.actuator.exists(&machine()).await.unwrap_err();
    assert!(matches!(err, ControllerError::Reconcile { operation: Operation::Exists, .. }));
    assert_eq!(f.events.events().len(), 1);
}

#[tokio::test]
async fn test_scope_failure_records_no_event() {
    let f = fixture();
    let mut machine = machine();
    machine.metadata.labels = None;

    let err = f.actuator.create(&machine).await.unwrap_err();
    assert!(matches!(err, ControllerError::Scope { .. }));
    assert!(err.is_fatal());
    assert!(f.actuator.update(&machine).await.is_err());
    assert!(f.actuator.delete(&machine).await.is_err());
    assert!(f.events.events().is_empty());
    assert!(f.tenant.patches().is_empty());
}
