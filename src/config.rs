use crate::types::ServiceType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Explicit service roster. This registration map is the primary source
    /// of truth for service types; name-based inference only covers
    /// services that appear outside it.
    #[serde(default)]
    pub services: Vec<ServiceRegistration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub extra_sans: Vec<String>,
}

/// Certificate authority settings: subject metadata and key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub country_code: String,
    /// Self-signed root validity. Root-key rotation is out of scope, so this
    /// is deliberately long.
    pub root_validity_days: u32,
    /// Fixed validity for issued service certificates.
    pub leaf_validity_days: u32,
    pub key_type: KeyType,
    pub root_key_size: u32,
    pub leaf_key_size: u32,
    /// Namespace baked into the canonical SAN set of every leaf.
    pub namespace: String,
    pub cluster_domain: String,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            common_name: "CertMesh Root CA".to_string(),
            organization: "CertMesh".to_string(),
            organizational_unit: "Service Identity".to_string(),
            country_code: "US".to_string(),
            root_validity_days: 3650,
            leaf_validity_days: 90,
            key_type: KeyType::Ecdsa,
            root_key_size: 384,
            leaf_key_size: 256,
            namespace: "default".to_string(),
            cluster_domain: "cluster.local".to_string(),
        }
    }
}

/// Supported key types for certificate generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Rsa,
    Ecdsa,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for per-service certificate bundles.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/certmesh/certificates"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Nominal interval between rotation sweeps.
    pub check_interval_secs: u64,
    /// Shortened interval after a failed sweep.
    pub error_backoff_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600,
            error_backoff_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Default namespace for secrets and workloads.
    pub namespace: String,
    /// Root namespace receiving the fleet-wide mesh policy.
    pub mesh_root_namespace: String,
    /// Deadline applied to every cluster API call.
    pub api_timeout_secs: u64,
    /// Field manager name for server-side apply.
    pub field_manager: String,
    /// Interval between automation cycles (rotation re-projection and
    /// expired-secret cleanup).
    pub automation_interval_secs: u64,
    /// Shortened interval after a failed automation cycle.
    pub error_backoff_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            mesh_root_namespace: "istio-system".to_string(),
            api_timeout_secs: 30,
            field_manager: "certmesh".to_string(),
            automation_interval_secs: 3600,
            error_backoff_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub metrics_interval_secs: u64,
    pub alert_interval_secs: u64,
    /// How much metrics history to retain, in seconds.
    pub metrics_retention_secs: u64,
    /// Number of most-recent alerts included in the dashboard snapshot.
    pub recent_alerts: usize,
    /// Upper bound on retained alerts.
    pub max_alerts: usize,
    /// Cluster health percentage below which a system-wide alert is raised.
    pub degraded_threshold_percent: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 300,
            alert_interval_secs: 600,
            metrics_retention_secs: 86_400,
            recent_alerts: 20,
            max_alerts: 1000,
            degraded_threshold_percent: 80.0,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::CertmeshError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.ca.leaf_validity_days == 0 {
            return Err(crate::error::CertmeshError::Config(
                "leaf_validity_days cannot be zero".to_string(),
            ));
        }
        if self.ca.root_validity_days < self.ca.leaf_validity_days {
            return Err(crate::error::CertmeshError::Config(
                "root validity must exceed leaf validity".to_string(),
            ));
        }
        if self.rotation.check_interval_secs == 0 {
            return Err(crate::error::CertmeshError::Config(
                "check_interval_secs cannot be zero".to_string(),
            ));
        }
        if self.monitoring.max_alerts == 0 {
            return Err(crate::error::CertmeshError::Config(
                "max_alerts cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}
