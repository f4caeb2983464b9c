//! TenantClusterClient trait for mocking
//!
//! The actuator reads ignition user data and bootstrap configuration from
//! the tenant cluster and writes the reconciled `Machine` back to it.

use crate::error::TenantError;
use crds::Machine;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

/// Reads and patches on the tenant cluster.
///
/// The patch methods take the mutated machine and the snapshot it was
/// copied from; only the difference between the two is sent, and an empty
/// difference sends nothing.
#[async_trait::async_trait]
pub trait TenantClusterClient: Send + Sync {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret, TenantError>;

    /// Parse `data[key]` of a config map as a flat YAML/JSON map.
    async fn get_config_map_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<BTreeMap<String, String>, TenantError>;

    /// Merge-patch metadata and spec of `new` relative to `old`.
    async fn patch_machine(&self, new: &Machine, old: &Machine) -> Result<(), TenantError>;

    /// Merge-patch the status subresource of `new` relative to `old`.
    async fn status_patch_machine(&self, new: &Machine, old: &Machine) -> Result<(), TenantError>;
}
