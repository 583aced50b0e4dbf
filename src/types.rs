use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

pub type ServiceName = String;

/// Workload tier a service identity belongs to. Drives the subject metadata
/// on issued certificates and the transport tuning in mesh policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Gateway,
    Inference,
    Database,
    Cache,
    Monitoring,
    Generic,
}

impl ServiceType {
    /// Stable lowercase label used in certificate subjects and cluster labels.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceType::Gateway => "gateway",
            ServiceType::Inference => "inference",
            ServiceType::Database => "database",
            ServiceType::Cache => "cache",
            ServiceType::Monitoring => "monitoring",
            ServiceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Certificate status as derived from the leaf certificate itself.
///
/// `Valid` means more than the renewal threshold remains before expiry;
/// `ExpiringSoon` means the threshold has been crossed but the certificate
/// is still usable. `Invalid` covers a leaf whose not-before lies in the
/// future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateStatus {
    Valid,
    ExpiringSoon,
    Expired,
    Revoked,
    Invalid,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertificateStatus::Valid => "valid",
            CertificateStatus::ExpiringSoon => "expiring_soon",
            CertificateStatus::Expired => "expired",
            CertificateStatus::Revoked => "revoked",
            CertificateStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Reasons for certificate revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    Superseded,
    CessationOfOperation,
}

/// Metadata describing one leaf certificate.
///
/// Always derived by parsing the certificate bytes (see
/// [`crate::metadata::derive_metadata`]); never persisted as independent
/// truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub service_name: ServiceName,
    pub common_name: String,
    /// Serial number as lowercase hex.
    pub serial: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
    pub status: CertificateStatus,
    pub san_entries: Vec<String>,
    pub key_usage: Vec<String>,
    pub issuer: String,
    /// SHA-256 over the certificate DER, lowercase hex.
    pub fingerprint: String,
    pub revocation_reason: Option<RevocationReason>,
}

impl CertificateMetadata {
    /// Whole days remaining before expiry; negative once expired.
    pub fn days_until_expiry(&self, now: SystemTime) -> i64 {
        match self.expires_at.duration_since(now) {
            Ok(remaining) => (remaining.as_secs() / 86_400) as i64,
            Err(e) => -((e.duration().as_secs() / 86_400) as i64),
        }
    }
}

/// A freshly issued leaf certificate and its private key, before storage.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// Serial assigned by the issuing CA, lowercase hex.
    pub serial: String,
}

/// The four PEM artifacts persisted per service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifacts {
    pub private_key_pem: String,
    pub certificate_pem: String,
    pub ca_certificate_pem: String,
    pub chain_pem: String,
}

/// The active certificate bundle for one service: artifacts plus metadata
/// derived from the leaf bytes at load time.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub private_key_pem: String,
    pub certificate_pem: String,
    pub ca_certificate_pem: String,
    pub chain_pem: String,
    pub metadata: CertificateMetadata,
}

impl CertificateBundle {
    pub fn artifacts(&self) -> StoredArtifacts {
        StoredArtifacts {
            private_key_pem: self.private_key_pem.clone(),
            certificate_pem: self.certificate_pem.clone(),
            ca_certificate_pem: self.ca_certificate_pem.clone(),
            chain_pem: self.chain_pem.clone(),
        }
    }
}

impl PartialEq for CertificateBundle {
    /// Bundles compare by artifact bytes; metadata is derived state.
    fn eq(&self, other: &Self) -> bool {
        self.private_key_pem == other.private_key_pem
            && self.certificate_pem == other.certificate_pem
            && self.ca_certificate_pem == other.ca_certificate_pem
            && self.chain_pem == other.chain_pem
    }
}

/// Read-back mirror of a deployed cluster secret, reconstructed from labels
/// and annotations only. Used for reconciliation and cleanup, never as the
/// source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSecretRecord {
    pub name: String,
    pub namespace: String,
    pub service_name: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cert_expiry: Option<chrono::DateTime<chrono::Utc>>,
}
