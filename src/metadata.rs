//! Certificate metadata derivation.
//!
//! Metadata is always recomputed from the certificate bytes it describes.
//! Nothing here is cached or persisted separately, so stored metadata can
//! never drift from the certificate it belongs to.

use crate::error::{CertmeshError, Result};
use crate::types::{CertificateMetadata, CertificateStatus, RevocationReason};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_parser::prelude::*;

/// Days before expiry at which a certificate stops being `Valid` for new
/// consumers and rotation becomes due.
pub const EXPIRY_WARNING_DAYS: u64 = 30;

/// Extract the first certificate in a PEM document as DER bytes.
pub fn leaf_der_from_pem(cert_pem: &str) -> Result<Vec<u8>> {
    rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .filter_map(|r| r.ok())
        .next()
        .map(|der| der.as_ref().to_vec())
        .ok_or_else(|| CertmeshError::InvalidCertificate {
            reason: "no certificate found in PEM data".to_string(),
        })
}

/// Parse a leaf certificate and derive its full metadata.
///
/// Pure function of (certificate bytes, revocation flag, now); invoked on
/// every store read rather than once at write time.
pub fn derive_metadata(
    service_name: &str,
    cert_pem: &str,
    revocation: Option<RevocationReason>,
    now: SystemTime,
) -> Result<CertificateMetadata> {
    let der = leaf_der_from_pem(cert_pem)?;

    let (_, cert) =
        X509Certificate::from_der(&der).map_err(|e| CertmeshError::InvalidCertificate {
            reason: format!("failed to parse certificate: {e}"),
        })?;

    let issued_at = asn1_to_system_time(&cert.validity().not_before)?;
    let expires_at = asn1_to_system_time(&cert.validity().not_after)?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut san_entries = Vec::new();
    let mut key_usage = Vec::new();
    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                for gn in &san.general_names {
                    if let GeneralName::DNSName(name) = gn {
                        san_entries.push(name.to_string());
                    }
                }
            }
            ParsedExtension::KeyUsage(ku) => {
                if ku.digital_signature() {
                    key_usage.push("digital_signature".to_string());
                }
                if ku.key_encipherment() {
                    key_usage.push("key_encipherment".to_string());
                }
                if ku.key_cert_sign() {
                    key_usage.push("key_cert_sign".to_string());
                }
                if ku.crl_sign() {
                    key_usage.push("crl_sign".to_string());
                }
            }
            ParsedExtension::ExtendedKeyUsage(eku) => {
                if eku.server_auth {
                    key_usage.push("server_auth".to_string());
                }
                if eku.client_auth {
                    key_usage.push("client_auth".to_string());
                }
            }
            _ => {}
        }
    }

    Ok(CertificateMetadata {
        service_name: service_name.to_string(),
        common_name,
        serial: hex::encode(cert.serial.to_bytes_be()),
        issued_at,
        expires_at,
        status: classify_status(now, issued_at, expires_at, revocation),
        san_entries,
        key_usage,
        issuer: cert.issuer().to_string(),
        fingerprint: fingerprint(&der),
        revocation_reason: revocation,
    })
}

/// SHA-256 fingerprint over the DER encoding, lowercase hex.
pub fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// Status is a pure function of now vs the validity window plus the
/// revocation flag. Revocation wins over everything else.
pub fn classify_status(
    now: SystemTime,
    not_before: SystemTime,
    not_after: SystemTime,
    revocation: Option<RevocationReason>,
) -> CertificateStatus {
    if revocation.is_some() {
        return CertificateStatus::Revoked;
    }
    if now < not_before {
        return CertificateStatus::Invalid;
    }
    if now >= not_after {
        return CertificateStatus::Expired;
    }
    let warning_window = Duration::from_secs(EXPIRY_WARNING_DAYS * 86_400);
    match not_after.duration_since(now) {
        Ok(remaining) if remaining > warning_window => CertificateStatus::Valid,
        _ => CertificateStatus::ExpiringSoon,
    }
}

fn asn1_to_system_time(t: &ASN1Time) -> Result<SystemTime> {
    let ts = t.timestamp();
    if ts < 0 {
        return Err(CertmeshError::InvalidCertificate {
            reason: format!("certificate validity predates the epoch: {ts}"),
        });
    }
    Ok(UNIX_EPOCH + Duration::from_secs(ts as u64))
}
