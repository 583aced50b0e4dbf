use super::*;
use crate::clock::ManualClock;
use crate::metadata::leaf_der_from_pem;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(86_400);

async fn setup() -> (Arc<ManualClock>, MtlsManager, TempDir) {
    let clock = Arc::new(ManualClock::new(
        UNIX_EPOCH + Duration::from_secs(1_750_000_000),
    ));
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.path = temp_dir.path().to_path_buf();
    let manager = MtlsManager::bootstrap(&config, clock.clone()).await.unwrap();
    (clock, manager, temp_dir)
}

#[tokio::test]
async fn initialize_is_idempotent_while_valid() {
    let (_clock, manager, _dir) = setup().await;

    let first = manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();
    let second = manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    // Bit-identical artifacts: no re-issuance happened.
    assert_eq!(first, second);
    assert_eq!(first.metadata.serial, second.metadata.serial);
}

#[tokio::test]
async fn initialize_reissues_after_expiry() {
    let (clock, manager, _dir) = setup().await;

    let first = manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    clock.advance(91 * DAY);
    let second = manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    assert_ne!(first.metadata.serial, second.metadata.serial);
    assert_eq!(second.metadata.status, CertificateStatus::Valid);
}

#[tokio::test]
async fn status_of_unknown_service_is_absent() {
    let (_clock, manager, _dir) = setup().await;
    assert!(manager
        .get_certificate_status("ghost")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn status_reports_derived_metadata() {
    let (_clock, manager, _dir) = setup().await;
    manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    let meta = manager
        .get_certificate_status("payments")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.common_name, "payments");
    assert_eq!(meta.status, CertificateStatus::Valid);
}

#[tokio::test]
async fn verify_peer_accepts_own_issuance_and_rejects_foreign() {
    let (clock, manager, _dir) = setup().await;

    let bundle = manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();
    let der = leaf_der_from_pem(&bundle.certificate_pem).unwrap();
    assert!(manager.verify_peer_certificate(&der, "payments"));

    let foreign_ca = crate::ca::CertificateAuthority::bootstrap(
        crate::config::CaConfig::default(),
        clock.clone(),
    )
    .unwrap();
    let foreign = foreign_ca
        .issue_service_certificate("payments", ServiceType::Database, &[])
        .unwrap();
    let foreign_der = leaf_der_from_pem(&foreign.certificate_pem).unwrap();
    assert!(!manager.verify_peer_certificate(&foreign_der, "payments"));
}

#[tokio::test]
async fn certificate_health_follows_expiry_tolerance() {
    let (clock, manager, _dir) = setup().await;
    manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    assert!(manager.is_certificate_healthy("payments").await);

    // 20 days remain: expiring soon, but inside the tolerance.
    clock.advance(70 * DAY);
    assert!(manager.is_certificate_healthy("payments").await);

    // 5 days remain: no longer healthy.
    clock.advance(15 * DAY);
    assert!(!manager.is_certificate_healthy("payments").await);

    assert!(!manager.is_certificate_healthy("ghost").await);
}

#[tokio::test(start_paused = true)]
async fn monitoring_loop_rotates_and_stops_on_shutdown() {
    let (clock, manager, _dir) = setup().await;
    manager
        .initialize_service_certificate("payments", ServiceType::Database, &[])
        .await
        .unwrap();
    let before = manager
        .get_certificate_status("payments")
        .await
        .unwrap()
        .unwrap();

    clock.advance(91 * DAY);

    let (tx, rx) = watch::channel(false);
    let handle = manager.start_certificate_monitoring(rx);

    // Wait for the first cycle to land.
    let mut after = before.clone();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        after = manager
            .get_certificate_status("payments")
            .await
            .unwrap()
            .unwrap();
        if after.serial != before.serial {
            break;
        }
    }
    assert_ne!(before.serial, after.serial);
    assert_eq!(after.status, CertificateStatus::Valid);

    tx.send(true).unwrap();
    handle.await.unwrap();
}
