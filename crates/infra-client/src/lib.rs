//! Infra cluster client
//!
//! Typed access to the cluster hosting the virtual machines: namespaced
//! CRUD over `VirtualMachine`, reads of `VirtualMachineInstance`, and
//! creation of the ignition secrets the machines boot from.
//!
//! # Example
//!
//! ```no_run
//! use infra_client::{InfraClusterClient, KubeInfraClient};
//!
//! # async fn example(kubeconfig: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeInfraClient::from_kubeconfig(&kubeconfig).await?;
//! let vm = client.get_virtual_machine("tenant-infra", "worker-0").await?;
//! println!("{} created={}", vm.name(), vm.status.unwrap_or_default().created);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod infra_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeInfraClient;
pub use error::InfraError;
pub use infra_trait::InfraClusterClient;
#[cfg(feature = "test-util")]
pub use mock::{InfraVerb, MockInfraClient};
