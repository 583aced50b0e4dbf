//! mTLS manager facade.
//!
//! Sole entry point for everything outside the certificate subsystem. Owns
//! the CA, store, validator, and rotation manager; collaborating workloads
//! only ever see `get_certificate_bundle`, `is_certificate_healthy`, and the
//! initialization/verification calls below.

use crate::ca::CertificateAuthority;
use crate::clock::Clock;
use crate::config::{Config, RotationConfig};
use crate::error::Result;
use crate::rotation::RotationManager;
use crate::store::CertificateStore;
use crate::types::{CertificateBundle, CertificateMetadata, CertificateStatus, ServiceType};
use crate::validator::CertificateValidator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct MtlsManager {
    ca: Arc<CertificateAuthority>,
    store: Arc<CertificateStore>,
    validator: Arc<CertificateValidator>,
    rotation: Arc<RotationManager>,
    rotation_config: RotationConfig,
    clock: Arc<dyn Clock>,
}

impl MtlsManager {
    /// Construct the full trust plane. CA bootstrap failure is fatal and
    /// propagates to the composition root.
    pub async fn bootstrap(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let ca = Arc::new(CertificateAuthority::bootstrap(
            config.ca.clone(),
            clock.clone(),
        )?);
        let store = Arc::new(CertificateStore::open(&config.storage, clock.clone()).await?);
        let validator = Arc::new(CertificateValidator::new(
            ca.ca_certificate_der().to_vec(),
            clock.clone(),
        ));
        let rotation = Arc::new(RotationManager::new(
            ca.clone(),
            store.clone(),
            clock.clone(),
        ));

        info!("mTLS manager initialized");
        Ok(Self {
            ca,
            store,
            validator,
            rotation,
            rotation_config: config.rotation.clone(),
            clock,
        })
    }

    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    pub fn validator(&self) -> &Arc<CertificateValidator> {
        &self.validator
    }

    pub fn rotation(&self) -> &Arc<RotationManager> {
        &self.rotation
    }

    /// Ensure a service holds a usable certificate bundle.
    ///
    /// Idempotent: while the stored bundle's status is `Valid` the same
    /// bundle is returned without re-issuance. Otherwise a fresh one is
    /// issued and stored. The per-service advisory lock serializes this
    /// against a concurrent rotation of the same service.
    pub async fn initialize_service_certificate(
        &self,
        service_name: &str,
        service_type: ServiceType,
        extra_sans: &[String],
    ) -> Result<CertificateBundle> {
        self.rotation.register_service(service_name, service_type);

        let guard = self.rotation.guard_for(service_name);
        let _lock = guard.lock().await;

        if let Some(bundle) = self.store.load(service_name).await? {
            if bundle.metadata.status == CertificateStatus::Valid {
                debug!(service = service_name, "reusing valid certificate bundle");
                return Ok(bundle);
            }
            info!(
                service = service_name,
                status = %bundle.metadata.status,
                "replacing unusable certificate bundle"
            );
        } else {
            info!(service = service_name, "issuing first certificate");
        }

        self.rotation
            .issue_and_store(service_name, service_type, extra_sans)
            .await
    }

    /// Metadata for a service's active certificate, absent if never issued.
    pub async fn get_certificate_status(
        &self,
        service_name: &str,
    ) -> Result<Option<CertificateMetadata>> {
        Ok(self
            .store
            .load(service_name)
            .await?
            .map(|bundle| bundle.metadata))
    }

    /// Collaborator-facing: the full bundle for a consuming workload.
    pub async fn get_certificate_bundle(
        &self,
        service_name: &str,
    ) -> Result<Option<CertificateBundle>> {
        self.store.load(service_name).await
    }

    /// Collaborator-facing: whether a service's certificate is currently
    /// usable. `ExpiringSoon` still counts as healthy while more than seven
    /// days remain (the same tolerance the dashboard applies).
    pub async fn is_certificate_healthy(&self, service_name: &str) -> bool {
        match self.store.load(service_name).await {
            Ok(Some(bundle)) => match bundle.metadata.status {
                CertificateStatus::Valid => true,
                CertificateStatus::ExpiringSoon => {
                    bundle.metadata.days_until_expiry(self.clock.now()) > 7
                }
                _ => false,
            },
            Ok(None) => false,
            Err(e) => {
                warn!(service = service_name, error = %e, "health probe failed to read bundle");
                false
            }
        }
    }

    /// Verify a peer certificate presented for `service_name`. Parsing and
    /// policy live in the validator; rejection is a normal `false`.
    pub fn verify_peer_certificate(&self, cert_der: &[u8], service_name: &str) -> bool {
        let accepted = self.validator.validate(cert_der);
        if accepted {
            debug!(service = service_name, "peer certificate accepted");
        } else {
            warn!(service = service_name, "peer certificate rejected");
        }
        accepted
    }

    /// Long-running rotation monitor: each cycle sweeps every known service,
    /// then sleeps (nominal interval, shortened back-off after a cycle
    /// error). Individual-service failures never terminate the task; the
    /// shutdown signal is only observed between cycles so an in-flight
    /// rotation always completes.
    pub fn start_certificate_monitoring(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let rotation = self.rotation.clone();
        let interval = Duration::from_secs(self.rotation_config.check_interval_secs);
        let backoff = Duration::from_secs(self.rotation_config.error_backoff_secs);

        tokio::spawn(async move {
            info!("certificate monitoring task started");
            let mut shutdown = shutdown;
            loop {
                let sleep_for = match rotation.check_and_rotate_all().await {
                    Ok(rotated) => {
                        if !rotated.is_empty() {
                            info!(count = rotated.len(), "monitoring cycle rotated certificates");
                        }
                        interval
                    }
                    Err(e) => {
                        error!(error = %e, "rotation sweep failed; backing off");
                        backoff
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("certificate monitoring task stopped");
        })
    }
}
