use thiserror::Error;

pub type Result<T> = std::result::Result<T, CertmeshError>;

#[derive(Error, Debug)]
pub enum CertmeshError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Certificate generation failed: {reason}")]
    CertificateGeneration { reason: String },

    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },

    #[error("Certificate not found: {identifier}")]
    CertificateNotFound { identifier: String },

    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::RcgenError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("Cluster API error: {0}")]
    KubeApi(#[from] kube::Error),

    #[error("Operation timeout")]
    Timeout,
}
