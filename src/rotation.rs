//! Certificate rotation.
//!
//! Per-service lifecycle: a bundle is current while its status is `Valid`;
//! once the expiry threshold is crossed (or the bundle is missing, or a
//! manual override has come due) the service needs rotation, and the next
//! sweep issues and stores a replacement. Rotation supersedes the prior
//! bundle; nothing is version-stacked.

use crate::ca::CertificateAuthority;
use crate::clock::Clock;
use crate::error::{CertmeshError, Result};
use crate::store::CertificateStore;
use crate::types::{CertificateBundle, CertificateStatus, ServiceType, StoredArtifacts};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Why a service qualifies for rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// No bundle exists for the service.
    Missing,
    /// The bundle exists but its status is no longer `Valid`.
    Status(CertificateStatus),
    /// A manual one-shot override has come due.
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDecision {
    Current,
    Due(RotationReason),
}

pub struct RotationManager {
    ca: Arc<CertificateAuthority>,
    store: Arc<CertificateStore>,
    clock: Arc<dyn Clock>,
    /// Explicit service→type registrations; the primary source of truth.
    registry: RwLock<HashMap<String, ServiceType>>,
    /// One-shot manual overrides, consumed when they fire.
    schedule: StdMutex<HashMap<String, SystemTime>>,
    /// Advisory per-service locks serializing check-then-act sequences so
    /// the same service cannot be rotated twice concurrently.
    guards: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RotationManager {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        store: Arc<CertificateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ca,
            store,
            clock,
            registry: RwLock::new(HashMap::new()),
            schedule: StdMutex::new(HashMap::new()),
            guards: StdMutex::new(HashMap::new()),
        }
    }

    /// Register a service with its explicit type. Registration is what makes
    /// a never-issued service visible to the rotation sweep.
    pub fn register_service(&self, service_name: &str, service_type: ServiceType) {
        self.registry
            .write()
            .unwrap()
            .insert(service_name.to_string(), service_type);
    }

    /// The registered type for a service, falling back to the keyword
    /// heuristic for services that were never explicitly registered.
    pub fn service_type_for(&self, service_name: &str) -> ServiceType {
        self.registry
            .read()
            .unwrap()
            .get(service_name)
            .copied()
            .unwrap_or_else(|| infer_service_type(service_name))
    }

    pub fn registered_services(&self) -> Vec<(String, ServiceType)> {
        let mut services: Vec<_> = self
            .registry
            .read()
            .unwrap()
            .iter()
            .map(|(name, ty)| (name.clone(), *ty))
            .collect();
        services.sort_by(|a, b| a.0.cmp(&b.0));
        services
    }

    /// Insert a one-shot manual rotation override.
    pub fn schedule_rotation(&self, service_name: &str, at: SystemTime) {
        info!(service = service_name, "manual rotation scheduled");
        self.schedule
            .lock()
            .unwrap()
            .insert(service_name.to_string(), at);
    }

    /// Decide whether a service needs rotation, without acting.
    ///
    /// A storage read failure propagates as an error: a transient fault must
    /// not be mistaken for "never issued", or the sweep would mint a
    /// duplicate certificate for a service that still holds a good bundle.
    pub async fn needs_rotation(&self, service_name: &str) -> Result<RotationDecision> {
        let scheduled = self
            .schedule
            .lock()
            .unwrap()
            .get(service_name)
            .copied();
        if let Some(at) = scheduled {
            if at <= self.clock.now() {
                return Ok(RotationDecision::Due(RotationReason::Scheduled));
            }
        }

        match self.store.load(service_name).await? {
            None => Ok(RotationDecision::Due(RotationReason::Missing)),
            Some(bundle) => match bundle.metadata.status {
                CertificateStatus::Valid => Ok(RotationDecision::Current),
                status => Ok(RotationDecision::Due(RotationReason::Status(status))),
            },
        }
    }

    /// Evaluate every known service and rotate the ones that qualify.
    ///
    /// One service's failure is logged and that service simply stays due for
    /// the next sweep; it never aborts the batch. Returns the names that
    /// were rotated.
    pub async fn check_and_rotate_all(&self) -> Result<Vec<String>> {
        let services = self.known_services().await?;
        let mut rotated = Vec::new();

        for service in services {
            let guard = self.guard_for(&service);
            let _lock = guard.lock().await;

            match self.needs_rotation(&service).await {
                Ok(RotationDecision::Current) => {}
                Ok(RotationDecision::Due(reason)) => {
                    info!(service = %service, ?reason, "rotating certificate");
                    let service_type = self.service_type_for(&service);
                    match self.issue_and_store(&service, service_type, &[]).await {
                        Ok(_) => {
                            self.schedule.lock().unwrap().remove(&service);
                            rotated.push(service);
                        }
                        Err(e) => {
                            error!(service = %service, error = %e, "rotation failed; will retry next sweep");
                        }
                    }
                }
                Err(e) => {
                    warn!(service = %service, error = %e, "skipping rotation check; bundle unreadable");
                }
            }
        }

        if !rotated.is_empty() {
            info!(count = rotated.len(), "rotation sweep replaced certificates");
        }
        Ok(rotated)
    }

    /// Issue a fresh certificate and persist the resulting bundle.
    /// Steps are strictly sequential; the stored bundle is re-loaded so the
    /// returned metadata is derived the same way any other read would.
    pub async fn issue_and_store(
        &self,
        service_name: &str,
        service_type: ServiceType,
        extra_sans: &[String],
    ) -> Result<CertificateBundle> {
        let issued =
            self.ca
                .issue_service_certificate(service_name, service_type, extra_sans)?;
        let ca_certificate_pem = self.ca.export_certificate();

        let artifacts = StoredArtifacts {
            chain_pem: format!("{}{}", issued.certificate_pem, ca_certificate_pem),
            private_key_pem: issued.private_key_pem,
            certificate_pem: issued.certificate_pem,
            ca_certificate_pem,
        };
        self.store.store(service_name, &artifacts).await?;

        self.store
            .load(service_name)
            .await?
            .ok_or_else(|| CertmeshError::Storage("bundle missing immediately after store".into()))
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    /// Advisory lock for a service's check-then-act sequence. Shared with
    /// the facade so initialization and rotation of the same service are
    /// serialized too.
    pub fn guard_for(&self, service_name: &str) -> Arc<Mutex<()>> {
        self.guards
            .lock()
            .unwrap()
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Every service the sweep considers: explicit registrations plus
    /// anything already present in the store.
    pub async fn known_services(&self) -> Result<Vec<String>> {
        let mut services: Vec<String> =
            self.registry.read().unwrap().keys().cloned().collect();
        services.extend(self.store.list_services().await?);
        services.sort();
        services.dedup();
        Ok(services)
    }
}

/// Keyword-substring fallback for services that were never registered with
/// an explicit type. The registration map is the primary source of truth;
/// this heuristic only fills the gap.
pub fn infer_service_type(service_name: &str) -> ServiceType {
    let name = service_name.to_ascii_lowercase();
    const RULES: &[(&str, ServiceType)] = &[
        ("gateway", ServiceType::Gateway),
        ("ingress", ServiceType::Gateway),
        ("api", ServiceType::Gateway),
        ("inference", ServiceType::Inference),
        ("model", ServiceType::Inference),
        ("embedding", ServiceType::Inference),
        ("llm", ServiceType::Inference),
        ("postgres", ServiceType::Database),
        ("mysql", ServiceType::Database),
        ("database", ServiceType::Database),
        ("db", ServiceType::Database),
        ("redis", ServiceType::Cache),
        ("memcache", ServiceType::Cache),
        ("cache", ServiceType::Cache),
        ("metrics", ServiceType::Monitoring),
        ("monitor", ServiceType::Monitoring),
        ("alert", ServiceType::Monitoring),
    ];
    for (keyword, service_type) in RULES {
        if name.contains(keyword) {
            return *service_type;
        }
    }
    ServiceType::Generic
}
