//! Tenant cluster client
//!
//! Access to the cluster whose `Machine` objects are reconciled: ignition
//! user data secrets, the bootstrap config map, and the two-phase (spec,
//! then status) merge patch of a reconciled machine.

pub mod client;
pub mod config_map;
pub mod error;
pub mod merge_patch;
#[path = "trait.rs"]
pub mod tenant_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeTenantClient;
pub use error::TenantError;
pub use tenant_trait::TenantClusterClient;
#[cfg(feature = "test-util")]
pub use mock::{MockTenantClient, PatchTarget, TenantVerb};
