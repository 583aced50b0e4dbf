use super::*;
use crate::clock::ManualClock;
use crate::metadata::derive_metadata;
use std::time::{Duration, UNIX_EPOCH};
use x509_parser::prelude::*;

fn test_clock() -> Arc<ManualClock> {
    // Whole-second epoch offset so ASN.1 time truncation cannot skew
    // validity arithmetic.
    Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_750_000_000)))
}

fn test_ca(clock: Arc<ManualClock>) -> CertificateAuthority {
    CertificateAuthority::bootstrap(CaConfig::default(), clock).unwrap()
}

#[test]
fn bootstrap_produces_self_signed_root() {
    let ca = test_ca(test_clock());

    let pem = ca.export_certificate();
    assert!(pem.contains("BEGIN CERTIFICATE"));

    let (_, cert) = X509Certificate::from_der(ca.ca_certificate_der()).unwrap();
    assert!(cert.subject().to_string().contains("CertMesh Root CA"));
    assert_eq!(cert.subject(), cert.issuer());

    let mut is_ca = false;
    let mut path_len = None;
    let mut cert_sign = false;
    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::BasicConstraints(bc) => {
                is_ca = bc.ca;
                path_len = bc.path_len_constraint;
            }
            ParsedExtension::KeyUsage(ku) => {
                cert_sign = ku.key_cert_sign() && ku.crl_sign();
            }
            _ => {}
        }
    }
    assert!(is_ca);
    assert_eq!(path_len, Some(0));
    assert!(cert_sign);
}

#[test]
fn bootstrap_exports_private_key() {
    let ca = test_ca(test_clock());
    let key = ca.export_key();
    assert!(key.contains("PRIVATE KEY"));
}

#[test]
fn issued_certificate_has_mtls_usage_and_canonical_sans() {
    let clock = test_clock();
    let ca = test_ca(clock.clone());

    let issued = ca
        .issue_service_certificate("payments", ServiceType::Database, &[])
        .unwrap();
    let meta =
        derive_metadata("payments", &issued.certificate_pem, None, clock.now()).unwrap();

    assert_eq!(meta.common_name, "payments");
    assert!(meta.san_entries.contains(&"payments".to_string()));
    assert!(meta.san_entries.contains(&"payments.default".to_string()));
    assert!(meta
        .san_entries
        .contains(&"payments.default.svc.cluster.local".to_string()));

    for usage in [
        "digital_signature",
        "key_encipherment",
        "server_auth",
        "client_auth",
    ] {
        assert!(
            meta.key_usage.contains(&usage.to_string()),
            "missing usage {usage}"
        );
    }
}

#[test]
fn issued_certificate_validity_is_exactly_ninety_days() {
    let clock = test_clock();
    let ca = test_ca(clock.clone());

    let issued = ca
        .issue_service_certificate("payments", ServiceType::Database, &[])
        .unwrap();
    let meta =
        derive_metadata("payments", &issued.certificate_pem, None, clock.now()).unwrap();

    let validity = meta.expires_at.duration_since(meta.issued_at).unwrap();
    assert_eq!(validity, Duration::from_secs(90 * 86_400));
}

#[test]
fn extra_sans_are_appended_and_deduplicated() {
    let clock = test_clock();
    let ca = test_ca(clock.clone());

    let extras = vec![
        "payments.example.com".to_string(),
        // Duplicate of a canonical identity; must not appear twice.
        "payments".to_string(),
    ];
    let issued = ca
        .issue_service_certificate("payments", ServiceType::Database, &extras)
        .unwrap();
    let meta =
        derive_metadata("payments", &issued.certificate_pem, None, clock.now()).unwrap();

    assert!(meta
        .san_entries
        .contains(&"payments.example.com".to_string()));
    let bare = meta.san_entries.iter().filter(|s| *s == "payments").count();
    assert_eq!(bare, 1);
}

#[test]
fn serials_increase_monotonically() {
    let clock = test_clock();
    let ca = test_ca(clock.clone());

    let first = ca
        .issue_service_certificate("a", ServiceType::Generic, &[])
        .unwrap();
    let second = ca
        .issue_service_certificate("b", ServiceType::Generic, &[])
        .unwrap();

    let first_serial = u64::from_str_radix(&first.serial, 16).unwrap();
    let second_serial = u64::from_str_radix(&second.serial, 16).unwrap();
    assert!(second_serial > first_serial);
    assert_eq!(ca.next_serial(), second_serial + 1);
}

#[test]
fn reported_serial_matches_parsed_certificate() {
    let clock = test_clock();
    let ca = test_ca(clock.clone());

    let issued = ca
        .issue_service_certificate("payments", ServiceType::Database, &[])
        .unwrap();
    let meta =
        derive_metadata("payments", &issued.certificate_pem, None, clock.now()).unwrap();
    assert_eq!(meta.serial, issued.serial);
}

#[test]
fn rejects_empty_service_name() {
    let ca = test_ca(test_clock());
    assert!(ca
        .issue_service_certificate("", ServiceType::Generic, &[])
        .is_err());
}

#[test]
fn subject_carries_service_type_metadata() {
    let clock = test_clock();
    let ca = test_ca(clock.clone());

    let issued = ca
        .issue_service_certificate("embeddings", ServiceType::Inference, &[])
        .unwrap();
    let der = metadata::leaf_der_from_pem(&issued.certificate_pem).unwrap();
    let (_, cert) = X509Certificate::from_der(&der).unwrap();
    let subject = cert.subject().to_string();
    assert!(subject.contains("embeddings"));
    assert!(subject.contains("inference"));
}
