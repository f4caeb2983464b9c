//! Main controller implementation.
//!
//! Builds the tenant and infra cluster clients, the actuator and the probe
//! server, then runs the machine watcher until it stops.

use crate::actuator::Actuator;
use crate::address::DnsResolver;
use crate::config::{infra_client_from_secret, BootstrapConfig, Config};
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::metrics::Metrics;
use crate::probes::{start_probe_server, ProbeState};
use crate::vm_manager::VmManager;
use crate::watcher::{watch_machines, Context};
use crds::Machine;
use kube::{Api, Client};
use std::sync::Arc;
use tenant_client::KubeTenantClient;
use tokio::task::JoinHandle;
use tracing::info;

/// Kubevirt machine controller.
pub struct Controller {
    api: Api<Machine>,
    context: Arc<Context>,
    probe_server: JoinHandle<()>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").field("context", &self.context).finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// The probe server starts first and reports ready once both clusters
    /// are reachable and the bootstrap configuration is loaded.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Kubevirt Machine Controller");

        let metrics = Metrics::new()
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to register metrics: {}", e)))?;
        let probes = ProbeState::new(metrics.clone());
        let probe_server = tokio::spawn(start_probe_server(config.probe_addr, probes.clone()));

        let kube_client = Client::try_default().await?;
        let tenant = Arc::new(KubeTenantClient::new(kube_client.clone()));

        let bootstrap = BootstrapConfig::load(tenant.as_ref()).await?;
        info!("  Infra namespace: {}", bootstrap.infra_namespace);
        info!("  Infra ID: {}", bootstrap.infra_id);

        let infra = infra_client_from_secret(
            tenant.as_ref(),
            &config.credentials_secret_namespace,
            &config.credentials_secret_name,
        )
        .await?;

        let vm_manager = VmManager::new(Arc::new(infra), Arc::new(DnsResolver::new(config.dns_resolve_timeout)));
        let actuator = Actuator::new(
            vm_manager,
            tenant,
            Arc::new(KubeEventPublisher::new(kube_client.clone())),
            bootstrap,
        );

        probes.set_ready(true);
        Ok(Self {
            api: Api::namespaced(kube_client, &config.watch_namespace),
            context: Arc::new(Context {
                actuator,
                metrics,
                requeue_after: config.requeue_after,
            }),
            probe_server,
        })
    }

    /// Runs the controller until the watcher stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Kubevirt Machine Controller running");
        watch_machines(self.api, self.context).await;
        self.probe_server.abort();
        Err(ControllerError::Watch("Machine watcher stopped".to_string()))
    }
}
