use super::*;
use crate::ca::CertificateAuthority;
use crate::clock::ManualClock;
use crate::config::CaConfig;
use crate::types::{CertificateStatus, ServiceType};
use pretty_assertions::assert_eq;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_750_000_000)))
}

async fn test_store(clock: Arc<ManualClock>) -> (CertificateStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig {
        path: temp_dir.path().to_path_buf(),
    };
    let store = CertificateStore::open(&config, clock).await.unwrap();
    (store, temp_dir)
}

fn issue_artifacts(ca: &CertificateAuthority, service: &str) -> StoredArtifacts {
    let issued = ca
        .issue_service_certificate(service, ServiceType::Generic, &[])
        .unwrap();
    let ca_pem = ca.export_certificate();
    StoredArtifacts {
        chain_pem: format!("{}{}", issued.certificate_pem, ca_pem),
        private_key_pem: issued.private_key_pem,
        certificate_pem: issued.certificate_pem,
        ca_certificate_pem: ca_pem,
    }
}

#[tokio::test]
async fn store_then_load_round_trips_metadata() {
    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let (store, _dir) = test_store(clock.clone()).await;

    let artifacts = issue_artifacts(&ca, "payments");
    store.store("payments", &artifacts).await.unwrap();

    let bundle = store.load("payments").await.unwrap().unwrap();
    assert_eq!(bundle.artifacts(), artifacts);

    let expected =
        derive_metadata("payments", &artifacts.certificate_pem, None, clock.now()).unwrap();
    assert_eq!(bundle.metadata.serial, expected.serial);
    assert_eq!(bundle.metadata.expires_at, expected.expires_at);
    assert_eq!(bundle.metadata.san_entries, expected.san_entries);
    assert_eq!(bundle.metadata.status, CertificateStatus::Valid);
}

#[tokio::test]
async fn load_of_never_issued_service_is_absent() {
    let (store, _dir) = test_store(test_clock()).await;
    assert!(store.load("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn store_overwrites_prior_bundle() {
    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let (store, _dir) = test_store(clock.clone()).await;

    let first = issue_artifacts(&ca, "payments");
    store.store("payments", &first).await.unwrap();
    let second = issue_artifacts(&ca, "payments");
    store.store("payments", &second).await.unwrap();

    let bundle = store.load("payments").await.unwrap().unwrap();
    assert_eq!(bundle.artifacts(), second);
    assert_ne!(bundle.certificate_pem, first.certificate_pem);
}

#[cfg(unix)]
#[tokio::test]
async fn private_key_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let (store, dir) = test_store(clock.clone()).await;
    store
        .store("payments", &issue_artifacts(&ca, "payments"))
        .await
        .unwrap();

    let mode = |file: &str| {
        std::fs::metadata(dir.path().join("payments").join(file))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };
    assert_eq!(mode("tls.key"), 0o600);
    assert_eq!(mode("tls.crt"), 0o640);
    assert_eq!(mode("ca.crt"), 0o640);
    assert_eq!(mode("chain.pem"), 0o640);
}

#[tokio::test]
async fn cold_store_reads_bundle_from_disk() {
    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig {
        path: temp_dir.path().to_path_buf(),
    };

    let artifacts = issue_artifacts(&ca, "payments");
    {
        let store = CertificateStore::open(&config, clock.clone()).await.unwrap();
        store.store("payments", &artifacts).await.unwrap();
    }

    let reopened = CertificateStore::open(&config, clock.clone()).await.unwrap();
    let bundle = reopened.load("payments").await.unwrap().unwrap();
    assert_eq!(bundle.artifacts(), artifacts);
}

#[tokio::test]
async fn revocation_marks_status_and_survives_reopen() {
    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig {
        path: temp_dir.path().to_path_buf(),
    };

    {
        let store = CertificateStore::open(&config, clock.clone()).await.unwrap();
        store
            .store("payments", &issue_artifacts(&ca, "payments"))
            .await
            .unwrap();
        store
            .mark_revoked("payments", RevocationReason::KeyCompromise)
            .await
            .unwrap();
        let bundle = store.load("payments").await.unwrap().unwrap();
        assert_eq!(bundle.metadata.status, CertificateStatus::Revoked);
        assert_eq!(
            bundle.metadata.revocation_reason,
            Some(RevocationReason::KeyCompromise)
        );
    }

    let reopened = CertificateStore::open(&config, clock.clone()).await.unwrap();
    let bundle = reopened.load("payments").await.unwrap().unwrap();
    assert_eq!(bundle.metadata.status, CertificateStatus::Revoked);
}

#[tokio::test]
async fn storing_fresh_bundle_clears_revocation() {
    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let (store, _dir) = test_store(clock.clone()).await;

    store
        .store("payments", &issue_artifacts(&ca, "payments"))
        .await
        .unwrap();
    store
        .mark_revoked("payments", RevocationReason::Superseded)
        .await
        .unwrap();
    store
        .store("payments", &issue_artifacts(&ca, "payments"))
        .await
        .unwrap();

    let bundle = store.load("payments").await.unwrap().unwrap();
    assert_eq!(bundle.metadata.status, CertificateStatus::Valid);
}

#[tokio::test]
async fn list_all_reports_every_stored_service() {
    let clock = test_clock();
    let ca = CertificateAuthority::bootstrap(CaConfig::default(), clock.clone()).unwrap();
    let (store, _dir) = test_store(clock.clone()).await;

    for service in ["payments", "search", "embeddings"] {
        store
            .store(service, &issue_artifacts(&ca, service))
            .await
            .unwrap();
    }

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.contains_key("payments"));
    assert_eq!(all["search"].status, CertificateStatus::Valid);
}

#[tokio::test]
async fn rejects_path_traversal_service_names() {
    let (store, _dir) = test_store(test_clock()).await;
    assert!(store.load("../escape").await.is_err());
    assert!(store.load("").await.is_err());
}
