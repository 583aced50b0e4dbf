//! Cluster projection.
//!
//! Takes issued bundles and makes the cluster reflect them: a TLS secret
//! per service, strict-mTLS mesh policy, and workloads wired to mount the
//! secret. Reconciliation works entirely from the labels and annotations
//! written here; the cluster is a projection, never the source of truth.

pub mod api;
pub mod mesh;
pub mod secrets;
pub mod workload;

pub use api::{ApplyOutcome, ClusterApi, KubeClusterApi};
pub use secrets::{managed_selector, secret_name};

use crate::clock::Clock;
use crate::config::ClusterConfig;
use crate::error::{CertmeshError, Result};
use crate::manager::MtlsManager;
use crate::types::ClusterSecretRecord;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "certmesh";
pub const LABEL_SERVICE: &str = "certmesh.io/service";
pub const LABEL_SERVICE_TYPE: &str = "certmesh.io/service-type";
pub const ANNOTATION_CREATED_AT: &str = "certmesh.io/created-at";
pub const ANNOTATION_EXPIRES_AT: &str = "certmesh.io/expires-at";
pub const ANNOTATION_SERIAL: &str = "certmesh.io/serial";
pub const ANNOTATION_FINGERPRINT: &str = "certmesh.io/fingerprint";

/// Outcome of a fleet bootstrap: best-effort, per-service.
#[derive(Debug, Default)]
pub struct FleetBootstrapReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl FleetBootstrapReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ClusterCertificateOrchestrator {
    manager: Arc<MtlsManager>,
    api: Arc<dyn ClusterApi>,
    config: ClusterConfig,
    cluster_domain: String,
    clock: Arc<dyn Clock>,
}

impl ClusterCertificateOrchestrator {
    pub fn new(
        manager: Arc<MtlsManager>,
        api: Arc<dyn ClusterApi>,
        config: ClusterConfig,
        cluster_domain: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            api,
            config,
            cluster_domain,
            clock,
        }
    }

    /// Project a service's bundle into the cluster as a TLS secret.
    pub async fn deploy_certificate_as_secret(
        &self,
        service_name: &str,
        namespace: &str,
    ) -> Result<ApplyOutcome> {
        let bundle = self
            .manager
            .get_certificate_bundle(service_name)
            .await?
            .ok_or_else(|| CertmeshError::CertificateNotFound {
                identifier: service_name.to_string(),
            })?;
        let service_type = self.manager.rotation().service_type_for(service_name);

        let secret = secrets::build_tls_secret(
            service_name,
            namespace,
            service_type,
            &bundle,
            self.now_utc(),
        );
        let outcome = self.api.apply_secret(namespace, secret).await?;
        info!(
            service = service_name,
            namespace,
            ?outcome,
            serial = %bundle.metadata.serial,
            "deployed certificate secret"
        );
        Ok(outcome)
    }

    /// Apply the per-service strict-mTLS policy pair.
    pub async fn apply_mesh_policy(&self, service_name: &str, namespace: &str) -> Result<()> {
        let service_type = self.manager.rotation().service_type_for(service_name);

        let peer_auth = mesh::peer_authentication(service_name, namespace);
        self.api.apply_manifest(Some(namespace), &peer_auth).await?;

        let rule =
            mesh::destination_rule(service_name, namespace, service_type, &self.cluster_domain);
        self.api.apply_manifest(Some(namespace), &rule).await?;

        info!(service = service_name, namespace, "applied mesh policy");
        Ok(())
    }

    /// Apply the fleet-wide strict-mTLS default in the mesh root namespace.
    pub async fn apply_fleet_wide_policy(&self) -> Result<()> {
        let policy = mesh::fleet_peer_authentication(&self.config.mesh_root_namespace);
        self.api
            .apply_manifest(Some(&self.config.mesh_root_namespace), &policy)
            .await?;
        info!(
            namespace = %self.config.mesh_root_namespace,
            "applied fleet-wide mTLS policy"
        );
        Ok(())
    }

    /// Point a service's Deployment at its certificate secret. Idempotent:
    /// the attachment is rebuilt from scratch on every call.
    pub async fn update_workload_with_certificate(
        &self,
        service_name: &str,
        namespace: &str,
    ) -> Result<()> {
        let metadata = self
            .manager
            .get_certificate_status(service_name)
            .await?
            .ok_or_else(|| CertmeshError::CertificateNotFound {
                identifier: service_name.to_string(),
            })?;

        let mut deployment = self
            .api
            .get_deployment(namespace, service_name)
            .await?
            .ok_or_else(|| {
                CertmeshError::Cluster(format!(
                    "no deployment named {service_name} in {namespace}"
                ))
            })?;

        workload::attach_certificate_volume(
            &mut deployment,
            &secret_name(service_name),
            &metadata.serial,
        )?;
        self.api.replace_deployment(namespace, deployment).await?;
        info!(service = service_name, namespace, "updated workload certificate mount");
        Ok(())
    }

    /// Delete management-labeled secrets whose recorded expiry has passed.
    /// Returns the deleted `namespace/name` identifiers for audit.
    pub async fn cleanup_expired_secrets(&self) -> Result<Vec<String>> {
        let found = self.api.list_secrets(&managed_selector()).await?;
        let now = self.now_utc();

        let mut deleted = Vec::new();
        for secret in &found {
            let Some(record) = secrets::secret_record(secret) else {
                continue;
            };
            if !secrets::is_expired(&record, now) {
                continue;
            }
            match self
                .api
                .delete_secret(&record.namespace, &record.name)
                .await
            {
                Ok(()) => {
                    info!(
                        namespace = %record.namespace,
                        name = %record.name,
                        "deleted expired certificate secret"
                    );
                    deleted.push(format!("{}/{}", record.namespace, record.name));
                }
                Err(e) => {
                    warn!(
                        namespace = %record.namespace,
                        name = %record.name,
                        error = %e,
                        "failed to delete expired secret; continuing"
                    );
                }
            }
        }
        Ok(deleted)
    }

    /// Reconciliation mirror of every managed secret.
    pub async fn list_secret_records(&self) -> Result<Vec<ClusterSecretRecord>> {
        let found = self.api.list_secrets(&managed_selector()).await?;
        Ok(found.iter().filter_map(secrets::secret_record).collect())
    }

    /// Issue, project, and enforce for every registered service, then apply
    /// the global policy once. Sequential per service to bound blast
    /// radius; one service's failure is recorded and the fleet continues.
    pub async fn bootstrap_fleet(&self) -> Result<FleetBootstrapReport> {
        let services = self.manager.rotation().registered_services();
        let namespace = self.config.namespace.clone();
        let mut report = FleetBootstrapReport::default();

        info!(count = services.len(), "bootstrapping fleet certificates");
        for (service, service_type) in services {
            match self
                .bootstrap_service(&service, service_type, &namespace)
                .await
            {
                Ok(()) => report.succeeded.push(service),
                Err(e) => {
                    error!(service = %service, error = %e, "fleet bootstrap failed for service");
                    report.failed.push((service, e.to_string()));
                }
            }
        }

        if let Err(e) = self.apply_fleet_wide_policy().await {
            error!(error = %e, "failed to apply fleet-wide policy");
            report
                .failed
                .push(("fleet-wide-policy".to_string(), e.to_string()));
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "fleet bootstrap finished"
        );
        Ok(report)
    }

    async fn bootstrap_service(
        &self,
        service_name: &str,
        service_type: crate::types::ServiceType,
        namespace: &str,
    ) -> Result<()> {
        debug!(service = service_name, "step 1: ensure certificate");
        self.manager
            .initialize_service_certificate(service_name, service_type, &[])
            .await?;

        debug!(service = service_name, "step 2: deploy secret");
        self.deploy_certificate_as_secret(service_name, namespace)
            .await?;

        debug!(service = service_name, "step 3: update workload");
        self.update_workload_with_certificate(service_name, namespace)
            .await?;

        debug!(service = service_name, "step 4: apply mesh policy");
        self.apply_mesh_policy(service_name, namespace).await?;

        Ok(())
    }

    /// One automation cycle: rotation sweep, re-projection of anything that
    /// rotated, then expired-secret cleanup.
    pub async fn run_automation_cycle(&self) -> Result<()> {
        let rotated = self.manager.rotation().check_and_rotate_all().await?;
        for service in &rotated {
            if let Err(e) = self.refresh_projection(service).await {
                warn!(service = %service, error = %e, "failed to re-project rotated certificate");
            }
        }

        let deleted = self.cleanup_expired_secrets().await?;
        if !deleted.is_empty() {
            info!(count = deleted.len(), "automation cycle removed expired secrets");
        }
        Ok(())
    }

    async fn refresh_projection(&self, service_name: &str) -> Result<()> {
        let namespace = self.config.namespace.clone();
        self.deploy_certificate_as_secret(service_name, &namespace)
            .await?;
        self.update_workload_with_certificate(service_name, &namespace)
            .await?;
        Ok(())
    }

    /// Periodic projection-layer automation, mirroring the manager's own
    /// monitoring loop: hourly cycle, shortened back-off after an error,
    /// shutdown observed only between cycles.
    pub fn start_automation_loop(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = Duration::from_secs(this.config.automation_interval_secs);
        let backoff = Duration::from_secs(this.config.error_backoff_secs);

        tokio::spawn(async move {
            info!("cluster automation task started");
            let mut shutdown = shutdown;
            loop {
                let sleep_for = match this.run_automation_cycle().await {
                    Ok(()) => interval,
                    Err(e) => {
                        error!(error = %e, "automation cycle failed; backing off");
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
            info!("cluster automation task stopped");
        })
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now().into()
    }
}
