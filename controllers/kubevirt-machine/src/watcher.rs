//! Machine watcher.
//!
//! Drives the actuator from a `kube_runtime::Controller` over `Machine`
//! objects. The loop decides which actuator operation a machine needs and
//! requeues it on a fixed interval; the actuator itself never schedules
//! anything.

use crate::actuator::Actuator;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::vm_manager::Operation;
use crds::Machine;
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Requeue delay after an error that needs a configuration change
pub const FATAL_REQUEUE_AFTER: Duration = Duration::from_secs(180);
/// Requeue delay after any other error
pub const TRANSIENT_REQUEUE_AFTER: Duration = Duration::from_secs(20);

/// Shared state of the reconcile loop
#[derive(Debug)]
pub struct Context {
    pub actuator: Actuator,
    pub metrics: Metrics,
    pub requeue_after: Duration,
}

/// Which operation a machine needs, given what is known about it.
///
/// A machine without a provider ID is always updated so the ID gets
/// published as soon as possible.
pub fn next_operation(deleting: bool, exists: bool, update_allowed: bool, has_provider_id: bool) -> Option<Operation> {
    if deleting {
        Some(Operation::Delete)
    } else if !exists {
        Some(Operation::Create)
    } else if update_allowed || !has_provider_id {
        Some(Operation::Update)
    } else {
        None
    }
}

/// Run the operation the machine needs. Returns the operation that ran.
pub async fn reconcile_machine(machine: &Machine, ctx: &Context) -> Result<Option<Operation>, ControllerError> {
    let deleting = machine.metadata.deletion_timestamp.is_some();
    let exists = if deleting {
        true
    } else {
        counted(ctx, Operation::Exists, ctx.actuator.exists(machine).await)?
    };
    let update_allowed = ctx.actuator.create_scope(machine)?.update_allowed(ctx.requeue_after);

    let Some(operation) = next_operation(deleting, exists, update_allowed, machine.has_provider_id()) else {
        debug!(machine = %machine.name(), "Machine is up to date");
        return Ok(None);
    };
    let result = match operation {
        Operation::Delete => ctx.actuator.delete(machine).await,
        Operation::Create => ctx.actuator.create(machine).await,
        _ => ctx.actuator.update(machine).await,
    };
    counted(ctx, operation, result)?;
    Ok(Some(operation))
}

fn counted<T>(ctx: &Context, operation: Operation, result: Result<T, ControllerError>) -> Result<T, ControllerError> {
    let outcome = if result.is_ok() { "success" } else { "error" };
    ctx.metrics.record(operation.as_str(), outcome);
    result
}

async fn reconcile(machine: Arc<Machine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    debug!(machine = %machine.name(), "Reconciling machine");
    reconcile_machine(&machine, &ctx).await?;
    Ok(Action::requeue(ctx.requeue_after))
}

/// Requeue delay for a failed reconcile
pub fn error_requeue(error: &ControllerError) -> Duration {
    if error.is_fatal() {
        FATAL_REQUEUE_AFTER
    } else {
        TRANSIENT_REQUEUE_AFTER
    }
}

fn error_policy(machine: Arc<Machine>, error: &ControllerError, _ctx: Arc<Context>) -> Action {
    let delay = error_requeue(error);
    error!(
        machine = %machine.name(),
        fatal = error.is_fatal(),
        requeue_after_secs = delay.as_secs(),
        "Reconciliation error: {}",
        error
    );
    Action::requeue(delay)
}

/// Watch machines until the stream ends.
pub async fn watch_machines(api: Api<Machine>, ctx: Arc<Context>) {
    info!("Starting Machine watcher");

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(5);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!(machine = %object.name, "Reconciled"),
                Err(e) => error!("Controller error for Machine: {}", e),
            }
        })
        .await;
}
