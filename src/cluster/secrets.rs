//! TLS secret projection.
//!
//! Builds the per-service TLS secret and reads back the mirror records used
//! for reconciliation. Expiry, serial, and fingerprint ride along as
//! annotations so cleanup never has to re-parse a certificate.

use super::{
    ANNOTATION_CREATED_AT, ANNOTATION_EXPIRES_AT, ANNOTATION_FINGERPRINT, ANNOTATION_SERIAL,
    LABEL_MANAGED_BY, LABEL_SERVICE, LABEL_SERVICE_TYPE, MANAGED_BY,
};
use crate::types::{CertificateBundle, ClusterSecretRecord, ServiceType};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

pub const SECRET_KEY_TLS_KEY: &str = "tls.key";
pub const SECRET_KEY_TLS_CRT: &str = "tls.crt";
pub const SECRET_KEY_CA_CRT: &str = "ca.crt";
pub const SECRET_KEY_CHAIN: &str = "cert-chain.pem";

/// Name of the secret carrying a service's certificate bundle.
pub fn secret_name(service_name: &str) -> String {
    format!("{service_name}-mtls")
}

/// Label selector matching every secret this subsystem manages.
pub fn managed_selector() -> String {
    format!("{LABEL_MANAGED_BY}={MANAGED_BY}")
}

/// Build the TLS-typed secret for a service's bundle. The cluster encodes
/// the artifact bytes as base64 on the wire.
pub fn build_tls_secret(
    service_name: &str,
    namespace: &str,
    service_type: ServiceType,
    bundle: &CertificateBundle,
    now: DateTime<Utc>,
) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        SECRET_KEY_TLS_KEY.to_string(),
        ByteString(bundle.private_key_pem.clone().into_bytes()),
    );
    data.insert(
        SECRET_KEY_TLS_CRT.to_string(),
        ByteString(bundle.certificate_pem.clone().into_bytes()),
    );
    data.insert(
        SECRET_KEY_CA_CRT.to_string(),
        ByteString(bundle.ca_certificate_pem.clone().into_bytes()),
    );
    data.insert(
        SECRET_KEY_CHAIN.to_string(),
        ByteString(bundle.chain_pem.clone().into_bytes()),
    );

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_SERVICE.to_string(), service_name.to_string());
    labels.insert(
        LABEL_SERVICE_TYPE.to_string(),
        service_type.as_label().to_string(),
    );

    let expires_at: DateTime<Utc> = bundle.metadata.expires_at.into();
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_CREATED_AT.to_string(), now.to_rfc3339());
    annotations.insert(
        ANNOTATION_EXPIRES_AT.to_string(),
        expires_at.to_rfc3339(),
    );
    annotations.insert(
        ANNOTATION_SERIAL.to_string(),
        bundle.metadata.serial.clone(),
    );
    annotations.insert(
        ANNOTATION_FINGERPRINT.to_string(),
        bundle.metadata.fingerprint.clone(),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(service_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Reconstruct the reconciliation mirror from a secret's labels and
/// annotations. Returns `None` for secrets that do not carry the management
/// labels. No certificate bytes are parsed here.
pub fn secret_record(secret: &Secret) -> Option<ClusterSecretRecord> {
    let labels = secret.metadata.labels.as_ref()?;
    if labels.get(LABEL_MANAGED_BY).map(String::as_str) != Some(MANAGED_BY) {
        return None;
    }
    let service_name = labels.get(LABEL_SERVICE)?.clone();
    let name = secret.metadata.name.clone()?;
    let namespace = secret.metadata.namespace.clone()?;

    let annotation = |key: &str| -> Option<DateTime<Utc>> {
        secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    Some(ClusterSecretRecord {
        name,
        namespace,
        service_name,
        created_at: secret
            .metadata
            .creation_timestamp
            .as_ref()
            .and_then(|t| DateTime::from_timestamp(t.0.as_second(), t.0.subsec_nanosecond() as u32))
            .or_else(|| annotation(ANNOTATION_CREATED_AT)),
        updated_at: annotation(ANNOTATION_CREATED_AT),
        cert_expiry: annotation(ANNOTATION_EXPIRES_AT),
    })
}

/// A record is expired once its recorded certificate expiry has passed.
/// Records without an expiry annotation are never auto-deleted.
pub fn is_expired(record: &ClusterSecretRecord, now: DateTime<Utc>) -> bool {
    record.cert_expiry.map(|expiry| expiry < now).unwrap_or(false)
}
