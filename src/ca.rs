//! Private certificate authority.
//!
//! Owns the root trust material and signs short-lived service identity
//! certificates. The CA private key never leaves this module except through
//! the explicit export operation. There is no internal state machine beyond
//! the monotonic serial counter; root-key rotation is out of scope.

use crate::clock::Clock;
use crate::config::{CaConfig, KeyType};
use crate::error::{CertmeshError, Result};
use crate::metadata;
use crate::types::{IssuedCertificate, ServiceType};
use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Serial assigned to the self-signed root; leaves start above it.
const ROOT_SERIAL: u64 = 1;

pub struct CertificateAuthority {
    config: CaConfig,
    ca_certificate: RcgenCertificate,
    ca_certificate_pem: String,
    ca_certificate_der: Vec<u8>,
    serial_counter: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CertificateAuthority {
    /// Generate the CA key pair and self-signed root certificate.
    ///
    /// A failure here is fatal: without the root there is no trust plane to
    /// start, so the error propagates to the composition root.
    pub fn bootstrap(config: CaConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let key_pair = generate_key_pair(config.key_type, config.root_key_size)?;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, config.common_name.clone());
        distinguished_name.push(DnType::OrganizationName, config.organization.clone());
        distinguished_name.push(
            DnType::OrganizationalUnitName,
            config.organizational_unit.clone(),
        );
        distinguished_name.push(DnType::CountryName, config.country_code.clone());

        let mut params = CertificateParams::new(vec![]);
        params.alg = signature_algorithm(config.key_type, config.root_key_size);
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let not_before = ::time::OffsetDateTime::from(clock.now());
        params.not_before = not_before;
        params.not_after = not_before + ::time::Duration::days(config.root_validity_days as i64);
        params.serial_number = Some(ROOT_SERIAL.into());
        params.key_pair = Some(key_pair);

        let ca_certificate =
            RcgenCertificate::from_params(params).map_err(|e| CertmeshError::CertificateGeneration {
                reason: format!("failed to generate root CA: {e}"),
            })?;

        // Serialize exactly once; every later view of the root (PEM export,
        // DER for the validator) must describe the same signed bytes.
        let ca_certificate_pem =
            ca_certificate
                .serialize_pem()
                .map_err(|e| CertmeshError::CertificateGeneration {
                    reason: format!("failed to serialize root CA: {e}"),
                })?;
        let ca_certificate_der = metadata::leaf_der_from_pem(&ca_certificate_pem)?;

        info!(
            common_name = %config.common_name,
            validity_days = config.root_validity_days,
            "bootstrapped certificate authority"
        );

        Ok(Self {
            config,
            ca_certificate,
            ca_certificate_pem,
            ca_certificate_der,
            serial_counter: AtomicU64::new(ROOT_SERIAL + 1),
            clock,
        })
    }

    /// Issue a fresh leaf certificate for a service identity.
    ///
    /// The SAN set always contains the canonical in-cluster identities (bare
    /// name, namespaced name, cluster-local FQDN) before any caller extras.
    /// Key usage and extended key usage are fixed for bidirectional mTLS.
    /// No retry semantics: a signing failure surfaces to the caller.
    pub fn issue_service_certificate(
        &self,
        service_name: &str,
        service_type: ServiceType,
        extra_sans: &[String],
    ) -> Result<IssuedCertificate> {
        if service_name.is_empty() {
            return Err(CertmeshError::CertificateGeneration {
                reason: "service name cannot be empty".to_string(),
            });
        }

        let serial = self.serial_counter.fetch_add(1, Ordering::SeqCst);
        let key_pair = generate_key_pair(self.config.key_type, self.config.leaf_key_size)?;

        let mut san_entries = self.canonical_sans(service_name);
        for extra in extra_sans {
            if !san_entries.contains(extra) {
                san_entries.push(extra.clone());
            }
        }

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, service_name.to_string());
        distinguished_name.push(DnType::OrganizationName, self.config.organization.clone());
        distinguished_name.push(
            DnType::OrganizationalUnitName,
            service_type.as_label().to_string(),
        );

        let mut params = CertificateParams::new(san_entries);
        params.alg = signature_algorithm(self.config.key_type, self.config.leaf_key_size);
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let not_before = ::time::OffsetDateTime::from(self.clock.now());
        params.not_before = not_before;
        params.not_after =
            not_before + ::time::Duration::days(self.config.leaf_validity_days as i64);
        params.serial_number = Some(serial.into());
        params.key_pair = Some(key_pair);

        let leaf =
            RcgenCertificate::from_params(params).map_err(|e| CertmeshError::CertificateGeneration {
                reason: format!("failed to build certificate for {service_name}: {e}"),
            })?;

        let certificate_pem = leaf
            .serialize_pem_with_signer(&self.ca_certificate)
            .map_err(|e| CertmeshError::CertificateGeneration {
                reason: format!("failed to sign certificate for {service_name}: {e}"),
            })?;
        let private_key_pem = leaf.serialize_private_key_pem();

        debug!(
            service = service_name,
            service_type = %service_type,
            serial,
            "issued service certificate"
        );

        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem,
            serial: serial_hex(serial),
        })
    }

    /// PEM-encoded CA certificate for backup or distribution.
    pub fn export_certificate(&self) -> String {
        self.ca_certificate_pem.clone()
    }

    /// PEM-encoded CA private key. Backup only; handle with care.
    pub fn export_key(&self) -> String {
        self.ca_certificate.serialize_private_key_pem()
    }

    /// DER encoding of the CA certificate, for signature verification.
    pub fn ca_certificate_der(&self) -> &[u8] {
        &self.ca_certificate_der
    }

    /// Next serial that will be assigned.
    pub fn next_serial(&self) -> u64 {
        self.serial_counter.load(Ordering::SeqCst)
    }

    fn canonical_sans(&self, service_name: &str) -> Vec<String> {
        let namespace = &self.config.namespace;
        let domain = &self.config.cluster_domain;
        vec![
            service_name.to_string(),
            format!("{service_name}.{namespace}"),
            format!("{service_name}.{namespace}.svc.{domain}"),
        ]
    }
}

/// Serial as minimal big-endian hex, matching how parsers render the DER
/// integer.
fn serial_hex(serial: u64) -> String {
    let bytes = serial.to_be_bytes();
    let first = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len() - 1);
    hex::encode(&bytes[first..])
}

/// Signature algorithm paired with a generated key of the given type/size.
/// Must match `generate_key_pair`; rcgen rejects a `CertificateParams.alg`
/// that is incompatible with the supplied key pair.
fn signature_algorithm(key_type: KeyType, key_size: u32) -> &'static rcgen::SignatureAlgorithm {
    match key_type {
        KeyType::Rsa => &rcgen::PKCS_RSA_SHA256,
        KeyType::Ecdsa => match key_size {
            384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            _ => &rcgen::PKCS_ECDSA_P256_SHA256,
        },
    }
}

fn generate_key_pair(key_type: KeyType, key_size: u32) -> Result<KeyPair> {
    let alg = signature_algorithm(key_type, key_size);
    match key_type {
        KeyType::Rsa => KeyPair::generate(alg).map_err(|e| {
            CertmeshError::CertificateGeneration {
                reason: format!("failed to generate RSA key pair: {e}"),
            }
        }),
        KeyType::Ecdsa => {
            KeyPair::generate(alg).map_err(|e| CertmeshError::CertificateGeneration {
                reason: format!("failed to generate ECDSA key pair: {e}"),
            })
        }
    }
}
