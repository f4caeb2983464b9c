//! Controller configuration.
//!
//! Process settings come from environment variables. The infra namespace
//! and infra ID are read from the tenant cluster's cloud provider config
//! map at startup, and the infra cluster client is built from a kubeconfig
//! stored in a tenant secret.

use crate::error::{ConfigurationError, ControllerError};
use infra_client::KubeInfraClient;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tenant_client::TenantClusterClient;

pub const CLOUD_PROVIDER_CONFIG_NAMESPACE: &str = "openshift-config";
pub const CLOUD_PROVIDER_CONFIG_NAME: &str = "cloud-provider-config";
pub const CLOUD_PROVIDER_CONFIG_DATA_KEY: &str = "config";
pub const INFRA_NAMESPACE_KEY: &str = "namespace";
pub const INFRA_ID_KEY: &str = "infraID";
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub watch_namespace: String,
    pub credentials_secret_name: String,
    pub credentials_secret_namespace: String,
    pub requeue_after: Duration,
    pub dns_resolve_timeout: Duration,
    pub probe_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any variable source; unset variables take their default.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let string = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| -> Result<u64, ControllerError> {
            match var(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ControllerError::InvalidConfig(format!("{} must be an integer, got {:?}", key, raw))),
                None => Ok(default),
            }
        };

        let probe_addr = string("PROBE_ADDR", "0.0.0.0:8081");
        let probe_addr = probe_addr
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("PROBE_ADDR is not a socket address: {:?}", probe_addr)))?;

        Ok(Self {
            watch_namespace: string("WATCH_NAMESPACE", "openshift-machine-api"),
            credentials_secret_name: string("INFRA_CREDENTIALS_SECRET_NAME", "kubevirt-credentials"),
            credentials_secret_namespace: string("INFRA_CREDENTIALS_SECRET_NAMESPACE", "openshift-machine-api"),
            requeue_after: Duration::from_secs(number("REQUEUE_AFTER_SECONDS", 20)?),
            dns_resolve_timeout: Duration::from_millis(number("DNS_RESOLVE_TIMEOUT_MS", 2000)?),
            probe_addr,
        })
    }
}

/// Where the machines' VMs live in the infra cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub infra_namespace: String,
    pub infra_id: String,
}

impl BootstrapConfig {
    pub async fn load(tenant: &dyn TenantClusterClient) -> Result<Self, ControllerError> {
        let mut values = tenant
            .get_config_map_value(
                CLOUD_PROVIDER_CONFIG_NAME,
                CLOUD_PROVIDER_CONFIG_NAMESPACE,
                CLOUD_PROVIDER_CONFIG_DATA_KEY,
            )
            .await?;
        let mut take = |key: &'static str| {
            values.remove(key).ok_or_else(|| ConfigurationError::MissingConfigKey {
                namespace: CLOUD_PROVIDER_CONFIG_NAMESPACE.to_string(),
                name: CLOUD_PROVIDER_CONFIG_NAME.to_string(),
                data_key: CLOUD_PROVIDER_CONFIG_DATA_KEY.to_string(),
                key,
            })
        };
        Ok(Self {
            infra_namespace: take(INFRA_NAMESPACE_KEY)?,
            infra_id: take(INFRA_ID_KEY)?,
        })
    }
}

/// Kubeconfig bytes of the infra cluster, read from the credentials secret
pub async fn infra_kubeconfig(
    tenant: &dyn TenantClusterClient,
    namespace: &str,
    name: &str,
) -> Result<Vec<u8>, ControllerError> {
    let credentials = |reason: String| ConfigurationError::InfraCredentials {
        namespace: namespace.to_string(),
        name: name.to_string(),
        reason,
    };
    let secret = match tenant.get_secret(name, namespace).await {
        Ok(secret) => secret,
        Err(e) if e.is_not_found() => return Err(credentials("secret not found".to_string()).into()),
        Err(e) => return Err(e.into()),
    };
    secret
        .data
        .and_then(|mut data| data.remove(KUBECONFIG_SECRET_KEY))
        .map(|bytes| bytes.0)
        .ok_or_else(|| credentials(format!("missing key {}", KUBECONFIG_SECRET_KEY)).into())
}

pub async fn infra_client_from_secret(
    tenant: &dyn TenantClusterClient,
    namespace: &str,
    name: &str,
) -> Result<KubeInfraClient, ControllerError> {
    let kubeconfig = infra_kubeconfig(tenant, namespace, name).await?;
    KubeInfraClient::from_kubeconfig(&kubeconfig).await.map_err(|e| {
        ConfigurationError::InfraCredentials {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tenant_client::{MockTenantClient, TenantVerb};

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(config.watch_namespace, "openshift-machine-api");
        assert_eq!(config.credentials_secret_name, "kubevirt-credentials");
        assert_eq!(config.credentials_secret_namespace, "openshift-machine-api");
        assert_eq!(config.requeue_after, Duration::from_secs(20));
        assert_eq!(config.dns_resolve_timeout, Duration::from_millis(2000));
        assert_eq!(config.probe_addr, "0.0.0.0:8081".parse().unwrap());
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = Config::from_vars(vars(&[("WATCH_NAMESPACE", "machines"), ("REQUEUE_AFTER_SECONDS", "45")])).unwrap();
        assert_eq!(config.watch_namespace, "machines");
        assert_eq!(config.requeue_after, Duration::from_secs(45));

        let err = Config::from_vars(vars(&[("DNS_RESOLVE_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
        assert!(Config::from_vars(vars(&[("PROBE_ADDR", "localhost")])).is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_config() {
        let tenant = MockTenantClient::new();
        tenant.add_config_map_value(
            CLOUD_PROVIDER_CONFIG_NAMESPACE,
            CLOUD_PROVIDER_CONFIG_NAME,
            CLOUD_PROVIDER_CONFIG_DATA_KEY,
            "namespace: tenant-infra\ninfraID: mycluster-x7k2p\n",
        );
        let config = BootstrapConfig::load(&tenant).await.unwrap();
        assert_eq!(
            config,
            BootstrapConfig {
                infra_namespace: "tenant-infra".to_string(),
                infra_id: "mycluster-x7k2p".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_bootstrap_config_missing_key_is_fatal() {
        let tenant = MockTenantClient::new();
        tenant.add_config_map_value(
            CLOUD_PROVIDER_CONFIG_NAMESPACE,
            CLOUD_PROVIDER_CONFIG_NAME,
            CLOUD_PROVIDER_CONFIG_DATA_KEY,
            "{\"namespace\": \"tenant-infra\"}",
        );
        let err = BootstrapConfig::load(&tenant).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "configMap openshift-config/cloud-provider-config: the map extracted with key config doesn't contain key infraID"
        );
    }

    #[tokio::test]
    async fn test_bootstrap_config_map_missing_is_transient() {
        let tenant = MockTenantClient::new();
        let err = BootstrapConfig::load(&tenant).await.unwrap_err();
        assert!(matches!(err, ControllerError::Tenant(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_infra_kubeconfig() {
        let tenant = MockTenantClient::new();
        let err = infra_kubeconfig(&tenant, "openshift-machine-api", "kubevirt-credentials")
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        tenant.add_secret("openshift-machine-api", "kubevirt-credentials", &[("token", b"x")]);
        let err = infra_kubeconfig(&tenant, "openshift-machine-api", "kubevirt-credentials")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing key kubeconfig"));

        tenant.add_secret("openshift-machine-api", "kubevirt-credentials", &[("kubeconfig", b"apiVersion: v1")]);
        let kubeconfig = infra_kubeconfig(&tenant, "openshift-machine-api", "kubevirt-credentials")
            .await
            .unwrap();
        assert_eq!(kubeconfig, b"apiVersion: v1");

        tenant.fail_on(TenantVerb::GetSecret);
        let err = infra_kubeconfig(&tenant, "openshift-machine-api", "kubevirt-credentials")
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_invalid_kubeconfig_is_a_credentials_error() {
        let tenant = MockTenantClient::new();
        tenant.add_secret("openshift-machine-api", "kubevirt-credentials", &[("kubeconfig", b"\xff\xfe")]);
        let err = infra_client_from_secret(&tenant, "openshift-machine-api", "kubevirt-credentials")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ControllerError::Configuration(ConfigurationError::InfraCredentials { .. })
        ));
    }
}
