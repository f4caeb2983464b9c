//! Kubevirt Machine Controller
//!
//! Backs `machine.openshift.io` Machines of a tenant cluster with kubevirt
//! VirtualMachines running in an infra cluster.
//!
//! For every Machine the controller keeps a VirtualMachine (plus the
//! ignition secret it boots from) in the infra namespace, and writes the
//! provider ID, instance state and node addresses back to the Machine.

mod actuator;
mod address;
mod config;
mod controller;
mod error;
mod events;
mod ignition;
mod machine_scope;
mod metrics;
mod probes;
mod quantity;
mod test_utils;
mod vm_manager;
mod watcher;

use crate::config::Config;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's rustls-tls needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Kubevirt Machine Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Watch namespace: {}", config.watch_namespace);
    info!(
        "  Infra credentials: {}/{}",
        config.credentials_secret_namespace, config.credentials_secret_name
    );
    info!("  Requeue after: {}s", config.requeue_after.as_secs());
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
