//! Certificate validation policy.
//!
//! Pure synchronous computation over (CA public key, candidate bytes, now):
//! no I/O, no suspension. Any single failed check rejects the certificate;
//! callers only see a boolean, the differentiated detail goes to the log.

use crate::clock::Clock;
use std::sync::Arc;
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// Outcome of a detailed validation pass.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn rejected(reason: String) -> Self {
        Self {
            is_valid: false,
            errors: vec![reason],
        }
    }
}

pub struct CertificateValidator {
    ca_certificate_der: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl CertificateValidator {
    pub fn new(ca_certificate_der: Vec<u8>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ca_certificate_der,
            clock,
        }
    }

    /// Validate a candidate certificate. All failure modes collapse to
    /// `false`; this is an expected negative result, not an error.
    pub fn validate(&self, cert_der: &[u8]) -> bool {
        let result = self.validate_detailed(cert_der);
        if !result.is_valid {
            debug!(errors = ?result.errors, "certificate rejected");
        }
        result.is_valid
    }

    /// Run every check and report each failure separately.
    ///
    /// Checks: (a) signature chains to the CA key, (b) now is inside the
    /// validity window, (c) key usage covers digitalSignature and
    /// keyEncipherment and extended key usage covers both serverAuth and
    /// clientAuth. No partial trust.
    pub fn validate_detailed(&self, cert_der: &[u8]) -> ValidationResult {
        let (_, ca) = match X509Certificate::from_der(&self.ca_certificate_der) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "CA certificate failed to parse");
                return ValidationResult::rejected(format!("CA certificate unparseable: {e}"));
            }
        };

        let (_, cert) = match X509Certificate::from_der(cert_der) {
            Ok(parsed) => parsed,
            Err(e) => {
                return ValidationResult::rejected(format!("failed to parse certificate: {e}"))
            }
        };

        let mut errors = Vec::new();

        if let Err(e) = cert.verify_signature(Some(ca.public_key())) {
            errors.push(format!("signature verification failed: {e}"));
        }

        let now = match self.clock.now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        };
        if now < cert.validity().not_before.timestamp() {
            errors.push("certificate is not yet valid".to_string());
        }
        if now > cert.validity().not_after.timestamp() {
            errors.push("certificate has expired".to_string());
        }

        let mut key_usage_ok = false;
        let mut extended_usage_ok = false;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::KeyUsage(ku) => {
                    key_usage_ok = ku.digital_signature() && ku.key_encipherment();
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    extended_usage_ok = eku.server_auth && eku.client_auth;
                }
                _ => {}
            }
        }
        if !key_usage_ok {
            errors.push(
                "key usage must include digitalSignature and keyEncipherment".to_string(),
            );
        }
        if !extended_usage_ok {
            errors.push("extended key usage must include serverAuth and clientAuth".to_string());
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}
