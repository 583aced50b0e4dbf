use super::*;
use crate::clock::ManualClock;
use crate::config::{CaConfig, StorageConfig};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(86_400);

async fn setup() -> (Arc<ManualClock>, RotationManager, TempDir) {
    let clock = Arc::new(ManualClock::new(
        UNIX_EPOCH + Duration::from_secs(1_750_000_000),
    ));
    let ca = Arc::new(
        CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap(),
    );
    let temp_dir = TempDir::new().unwrap();
    let store_config = StorageConfig {
        path: temp_dir.path().to_path_buf(),
    };
    let store = Arc::new(
        CertificateStore::open(&store_config, clock.clone())
            .await
            .unwrap(),
    );
    let rotation = RotationManager::new(ca, store, clock.clone());
    (clock, rotation, temp_dir)
}

#[tokio::test]
async fn fresh_certificate_is_current() {
    let (_clock, rotation, _dir) = setup().await;
    rotation
        .issue_and_store("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    assert_eq!(
        rotation.needs_rotation("payments").await.unwrap(),
        RotationDecision::Current
    );
    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert!(rotated.is_empty());
}

#[tokio::test]
async fn missing_bundle_is_due() {
    let (_clock, rotation, _dir) = setup().await;
    rotation.register_service("payments", ServiceType::Database);

    assert_eq!(
        rotation.needs_rotation("payments").await.unwrap(),
        RotationDecision::Due(RotationReason::Missing)
    );
}

#[tokio::test]
async fn crossing_expiry_threshold_triggers_rotation() {
    let (clock, rotation, _dir) = setup().await;
    rotation
        .issue_and_store("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    // 61 days in: 29 days remain, inside the 30-day window.
    clock.advance(61 * DAY);
    assert_eq!(
        rotation.needs_rotation("payments").await.unwrap(),
        RotationDecision::Due(RotationReason::Status(CertificateStatus::ExpiringSoon))
    );

    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert_eq!(rotated, vec!["payments".to_string()]);
}

#[tokio::test]
async fn service_outside_threshold_is_not_rotated() {
    let (clock, rotation, _dir) = setup().await;
    rotation
        .issue_and_store("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    // 59 days in: 31 days remain, still current.
    clock.advance(59 * DAY);
    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert!(rotated.is_empty());
}

#[tokio::test]
async fn expired_certificate_is_replaced_with_greater_serial() {
    let (clock, rotation, _dir) = setup().await;
    let old = rotation
        .issue_and_store("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    clock.advance(91 * DAY);
    assert_eq!(
        rotation.needs_rotation("payments").await.unwrap(),
        RotationDecision::Due(RotationReason::Status(CertificateStatus::Expired))
    );

    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert_eq!(rotated, vec!["payments".to_string()]);

    let fresh = rotation
        .store()
        .load("payments")
        .await
        .expect("bundle readable")
        .expect("bundle present");
    assert_eq!(fresh.metadata.status, CertificateStatus::Valid);

    let validity = fresh
        .metadata
        .expires_at
        .duration_since(clock.now())
        .unwrap();
    assert_eq!(validity, 90 * DAY);

    let old_serial = u64::from_str_radix(&old.metadata.serial, 16).unwrap();
    let new_serial = u64::from_str_radix(&fresh.metadata.serial, 16).unwrap();
    assert!(new_serial > old_serial);
}

#[tokio::test]
async fn manual_schedule_is_one_shot() {
    let (clock, rotation, _dir) = setup().await;
    let before = rotation
        .issue_and_store("payments", ServiceType::Database, &[])
        .await
        .unwrap();

    rotation.schedule_rotation("payments", clock.now() + Duration::from_secs(3600));

    // Not yet due.
    assert!(rotation.check_and_rotate_all().await.unwrap().is_empty());

    clock.advance(Duration::from_secs(7200));
    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert_eq!(rotated, vec!["payments".to_string()]);

    let after = rotation.store().load("payments").await.unwrap().unwrap();
    assert_ne!(before.metadata.serial, after.metadata.serial);

    // The override was consumed; the fresh bundle stays put.
    assert!(rotation.check_and_rotate_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn one_bad_service_does_not_abort_the_sweep() {
    let (clock, rotation, _dir) = setup().await;
    rotation
        .issue_and_store("payments", ServiceType::Database, &[])
        .await
        .unwrap();
    // Registered name the store refuses: its check errors every sweep.
    rotation.register_service("../escape", ServiceType::Generic);

    clock.advance(61 * DAY);
    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert_eq!(rotated, vec!["payments".to_string()]);
}

#[tokio::test]
async fn registered_but_unissued_service_is_bootstrapped_by_sweep() {
    let (_clock, rotation, _dir) = setup().await;
    rotation.register_service("search", ServiceType::Gateway);

    let rotated = rotation.check_and_rotate_all().await.unwrap();
    assert_eq!(rotated, vec!["search".to_string()]);
    assert_eq!(
        rotation.needs_rotation("search").await.unwrap(),
        RotationDecision::Current
    );
}

#[test]
fn service_type_inference_is_a_fallback_only() {
    assert_eq!(infer_service_type("user-database"), ServiceType::Database);
    assert_eq!(infer_service_type("llm-router"), ServiceType::Inference);
    assert_eq!(infer_service_type("session-cache"), ServiceType::Cache);
    assert_eq!(infer_service_type("edge-gateway"), ServiceType::Gateway);
    assert_eq!(infer_service_type("metrics-scraper"), ServiceType::Monitoring);
    assert_eq!(infer_service_type("payments"), ServiceType::Generic);
}

#[tokio::test]
async fn explicit_registration_beats_inference() {
    let (_clock, rotation, _dir) = setup().await;
    // The name smells like a database; the registration says otherwise.
    rotation.register_service("vector-db", ServiceType::Inference);
    assert_eq!(
        rotation.service_type_for("vector-db"),
        ServiceType::Inference
    );
    assert_eq!(rotation.service_type_for("other-db"), ServiceType::Database);
}
