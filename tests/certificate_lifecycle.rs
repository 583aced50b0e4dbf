//! End-to-end certificate lifecycle: issue, persist, validate, rotate.

use certmesh::clock::{Clock, ManualClock};
use certmesh::config::Config;
use certmesh::metadata::leaf_der_from_pem;
use certmesh::types::{CertificateStatus, ServiceType};
use certmesh::MtlsManager;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(86_400);

async fn bootstrap() -> (Arc<ManualClock>, MtlsManager, TempDir) {
    let clock = Arc::new(ManualClock::new(
        UNIX_EPOCH + Duration::from_secs(1_750_000_000),
    ));
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.path = dir.path().to_path_buf();
    let manager = MtlsManager::bootstrap(&config, clock.clone()).await.unwrap();
    (clock, manager, dir)
}

#[tokio::test]
async fn issue_store_validate_and_rotate() {
    let (clock, manager, _dir) = bootstrap().await;

    // Issue with a caller-supplied SAN on top of the canonical set.
    let bundle = manager
        .initialize_service_certificate(
            "payments",
            ServiceType::Database,
            &["payments.example.com".to_string()],
        )
        .await
        .unwrap();

    let meta = &bundle.metadata;
    assert_eq!(meta.status, CertificateStatus::Valid);
    for san in [
        "payments",
        "payments.default",
        "payments.default.svc.cluster.local",
        "payments.example.com",
    ] {
        assert!(
            meta.san_entries.contains(&san.to_string()),
            "missing SAN {san}"
        );
    }
    for usage in ["server_auth", "client_auth"] {
        assert!(meta.key_usage.contains(&usage.to_string()));
    }
    assert_eq!(
        meta.expires_at.duration_since(meta.issued_at).unwrap(),
        90 * DAY
    );

    // The issued certificate verifies under its own CA.
    let der = leaf_der_from_pem(&bundle.certificate_pem).unwrap();
    assert!(manager.verify_peer_certificate(&der, "payments"));

    // Reloading round-trips the artifacts and re-derives identical
    // metadata.
    let reloaded = manager
        .get_certificate_bundle("payments")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded, bundle);
    assert_eq!(reloaded.metadata.serial, meta.serial);
    assert!(manager.is_certificate_healthy("payments").await);

    // Crossing the renewal threshold makes the sweep replace the bundle.
    clock.advance(61 * DAY);
    let rotated = manager.rotation().check_and_rotate_all().await.unwrap();
    assert_eq!(rotated, vec!["payments".to_string()]);

    let fresh = manager
        .get_certificate_bundle("payments")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.metadata.status, CertificateStatus::Valid);
    assert_eq!(
        fresh
            .metadata
            .expires_at
            .duration_since(clock.now())
            .unwrap(),
        90 * DAY
    );

    let old_serial = u64::from_str_radix(&meta.serial, 16).unwrap();
    let new_serial = u64::from_str_radix(&fresh.metadata.serial, 16).unwrap();
    assert!(new_serial > old_serial);

    // The superseded certificate no longer passes validation once expired.
    clock.advance(30 * DAY);
    assert!(!manager.verify_peer_certificate(&der, "payments"));
}

#[tokio::test]
async fn repeated_initialization_never_reissues_while_valid() {
    let (_clock, manager, _dir) = bootstrap().await;

    let first = manager
        .initialize_service_certificate("search", ServiceType::Gateway, &[])
        .await
        .unwrap();
    let second = manager
        .initialize_service_certificate("search", ServiceType::Gateway, &[])
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.certificate_pem, second.certificate_pem);
    assert_eq!(first.private_key_pem, second.private_key_pem);
}

#[tokio::test]
async fn ca_material_survives_for_backup() {
    let (_clock, manager, _dir) = bootstrap().await;

    let cert = manager.ca().export_certificate();
    let key = manager.ca().export_key();
    assert!(cert.contains("BEGIN CERTIFICATE"));
    assert!(key.contains("PRIVATE KEY"));

    // The chain handed to services embeds the same CA certificate.
    let bundle = manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();
    assert!(bundle.chain_pem.contains(cert.trim_end()));
    assert_eq!(bundle.ca_certificate_pem, cert);
}

#[tokio::test]
async fn collaborator_api_reports_absent_services() {
    let (_clock, manager, _dir) = bootstrap().await;

    assert!(manager
        .get_certificate_bundle("unknown")
        .await
        .unwrap()
        .is_none());
    assert!(manager
        .get_certificate_status("unknown")
        .await
        .unwrap()
        .is_none());
    assert!(!manager.is_certificate_healthy("unknown").await);
}
