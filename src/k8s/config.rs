//! Connection settings for the Kubernetes API server
//!
//! Resolution order used by [`ClusterConfig::from_env`]:
//!
//! 1. In-cluster service account (`KUBERNETES_SERVICE_HOST` plus the
//!    mounted token, CA bundle and namespace files)
//! 2. A local `kubectl proxy` on `http://127.0.0.1:8001`
//! 3. `KTRACE_SERVER`, `KTRACE_TOKEN`, `KTRACE_NAMESPACE` and
//!    `KTRACE_INSECURE_SKIP_TLS_VERIFY` override either

use std::fs;
use std::path::Path;

use super::client::ClusterError;

/// Default address of `kubectl proxy`
const DEFAULT_PROXY_SERVER: &str = "http://127.0.0.1:8001";

/// Where the kubelet mounts service account credentials
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL of the API server, without trailing slash
    pub server: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// PEM bundle used to verify the server certificate
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Skip TLS verification entirely (test clusters only)
    pub insecure_skip_tls_verify: bool,
    /// Namespace used when the caller does not pick one
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_PROXY_SERVER.to_string(),
            token: None,
            ca_cert_pem: None,
            insecure_skip_tls_verify: false,
            namespace: "default".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Build a config from the process environment
    pub fn from_env() -> Result<Self, ClusterError> {
        let mut config = match std::env::var("KUBERNETES_SERVICE_HOST") {
            Ok(host) => Self::in_cluster(&host, Path::new(SERVICE_ACCOUNT_DIR))?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `KTRACE_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("KTRACE_SERVER") {
            self.server = server.trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup("KTRACE_TOKEN") {
            self.token = Some(token);
        }
        if let Some(namespace) = lookup("KTRACE_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(insecure) = lookup("KTRACE_INSECURE_SKIP_TLS_VERIFY") {
            self.insecure_skip_tls_verify =
                matches!(insecure.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Read service account credentials from `sa_dir`
    pub fn in_cluster(host: &str, sa_dir: &Path) -> Result<Self, ClusterError> {
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let token = fs::read_to_string(sa_dir.join("token"))?;
        let ca_cert_pem = fs::read(sa_dir.join("ca.crt")).ok();
        let namespace = fs::read_to_string(sa_dir.join("namespace"))
            .map(|ns| ns.trim().to_string())
            .unwrap_or_else(|_| "default".to_string());

        // IPv6 service hosts need brackets in a URL
        let server = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        Ok(Self {
            server,
            token: Some(token.trim().to_string()),
            ca_cert_pem,
            insecure_skip_tls_verify: false,
            namespace,
        })
    }
}
