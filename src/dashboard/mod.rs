//! Monitoring dashboard.
//!
//! Read-model over the whole certificate estate: status counters with a
//! bounded history, per-service and cluster health checks, an alert engine,
//! and the merged snapshot served to operators.

pub mod alerts;

pub use alerts::{Alert, AlertLog, AlertSeverity, AlertType};

use crate::clock::Clock;
use crate::cluster::ClusterCertificateOrchestrator;
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::manager::MtlsManager;
use crate::types::{CertificateMetadata, CertificateStatus, ClusterSecretRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Point-in-time counts of certificates per status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: SystemTime,
    pub valid: usize,
    pub expiring_soon: usize,
    pub expired: usize,
    pub revoked: usize,
    pub invalid: usize,
}

impl MetricsSnapshot {
    pub fn total(&self) -> usize {
        self.valid + self.expiring_soon + self.expired + self.revoked + self.invalid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub healthy: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub total_services: usize,
    pub healthy_services: usize,
    pub health_percentage: f64,
    pub critical_issues: Vec<String>,
    pub services: Vec<ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub service: String,
    pub common_name: String,
    pub status: CertificateStatus,
    pub expires_at: SystemTime,
    pub days_until_expiry: i64,
    pub san_entries: Vec<String>,
    pub serial: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: usize,
    pub by_severity: HashMap<AlertSeverity, usize>,
    pub recent: Vec<Alert>,
}

/// The merged operator read-model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: SystemTime,
    pub status_counts: MetricsSnapshot,
    pub health: ClusterHealth,
    pub alerts: AlertSummary,
    pub certificates: Vec<CertificateSummary>,
    pub secrets: Vec<ClusterSecretRecord>,
}

pub struct MonitoringDashboard {
    manager: Arc<MtlsManager>,
    cluster: Arc<ClusterCertificateOrchestrator>,
    alerts: AlertLog,
    history: RwLock<VecDeque<MetricsSnapshot>>,
    config: MonitoringConfig,
    clock: Arc<dyn Clock>,
}

impl MonitoringDashboard {
    pub fn new(
        manager: Arc<MtlsManager>,
        cluster: Arc<ClusterCertificateOrchestrator>,
        config: MonitoringConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            cluster,
            alerts: AlertLog::new(config.max_alerts, clock.clone()),
            history: RwLock::new(VecDeque::new()),
            config,
            clock,
        }
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Snapshot the per-status counts and append them to the bounded,
    /// time-ordered history.
    pub async fn collect_metrics(&self) -> Result<MetricsSnapshot> {
        let snapshot = self.current_counts().await?;

        let mut history = self.history.write().unwrap();
        history.push_back(snapshot);
        let cutoff = self
            .clock
            .now()
            .checked_sub(Duration::from_secs(self.config.metrics_retention_secs));
        if let Some(cutoff) = cutoff {
            while history
                .front()
                .map(|s| s.timestamp < cutoff)
                .unwrap_or(false)
            {
                history.pop_front();
            }
        }

        debug!(total = snapshot.total(), "collected certificate metrics");
        Ok(snapshot)
    }

    pub fn metrics_history(&self) -> Vec<MetricsSnapshot> {
        self.history.read().unwrap().iter().copied().collect()
    }

    /// Health of one service's certificate.
    ///
    /// Healthy means no issues, or exactly one "expires in N days" issue
    /// with more than seven days remaining. That single near-expiry window
    /// is tolerated because rotation is expected to land well inside it.
    pub async fn perform_health_check(&self, service_name: &str) -> ServiceHealth {
        let mut issues = Vec::new();

        match self.manager.get_certificate_status(service_name).await {
            Ok(None) => issues.push("no certificate issued".to_string()),
            Ok(Some(meta)) => {
                match meta.status {
                    CertificateStatus::Valid => {}
                    CertificateStatus::ExpiringSoon => {
                        let days = meta.days_until_expiry(self.clock.now()).max(0);
                        issues.push(format!("certificate expires in {days} days"));
                    }
                    CertificateStatus::Expired => {
                        issues.push("certificate has expired".to_string());
                    }
                    CertificateStatus::Revoked => {
                        issues.push("certificate status is revoked".to_string());
                    }
                    CertificateStatus::Invalid => {
                        issues.push("certificate status is invalid".to_string());
                    }
                }
                if meta.san_entries.is_empty() {
                    issues.push("certificate is missing SAN entries".to_string());
                }
            }
            Err(e) => issues.push(format!("certificate check failed: {e}")),
        }

        let healthy = issues.is_empty()
            || (issues.len() == 1
                && expiring_days(&issues[0]).map(|d| d > 7).unwrap_or(false));

        ServiceHealth {
            service: service_name.to_string(),
            healthy,
            issues,
        }
    }

    /// Aggregate health across every known service. Critical issues are the
    /// subset whose text mentions "expired" or "failed".
    pub async fn perform_cluster_health_check(&self) -> Result<ClusterHealth> {
        let services = self.manager.rotation().known_services().await?;
        let mut checks = Vec::with_capacity(services.len());
        for service in &services {
            checks.push(self.perform_health_check(service).await);
        }

        let total = checks.len();
        let healthy = checks.iter().filter(|c| c.healthy).count();
        let critical_issues: Vec<String> = checks
            .iter()
            .flat_map(|c| c.issues.iter())
            .filter(|issue| issue.contains("expired") || issue.contains("failed"))
            .map(|issue| issue.clone())
            .collect();
        let health_percentage = if total == 0 {
            100.0
        } else {
            healthy as f64 / total as f64 * 100.0
        };

        Ok(ClusterHealth {
            total_services: total,
            healthy_services: healthy,
            health_percentage,
            critical_issues,
            services: checks,
        })
    }

    /// One alert-engine cycle: run the cluster health check, raise one
    /// alert per unhealthy service with escalated severity, resolve alerts
    /// for recovered services, and track overall degradation.
    pub async fn run_alert_cycle(&self) -> Result<()> {
        let health = self.perform_cluster_health_check().await?;

        for check in &health.services {
            if check.healthy {
                self.alerts.resolve_for_service(&check.service);
                continue;
            }

            let has_critical_issue = check
                .issues
                .iter()
                .any(|i| i.contains("expired") || i.contains("failed"));
            let near_expiry = check
                .issues
                .iter()
                .filter_map(|i| expiring_days(i))
                .any(|d| d <= 7);

            let severity = if has_critical_issue {
                AlertSeverity::Critical
            } else if near_expiry {
                AlertSeverity::Error
            } else {
                AlertSeverity::Warning
            };
            let alert_type = if check.issues.iter().any(|i| i.contains("expired")) {
                AlertType::CertificateExpired
            } else if check.issues.iter().any(|i| expiring_days(i).is_some()) {
                AlertType::CertificateExpiring
            } else {
                AlertType::ServiceUnhealthy
            };

            let mut details = HashMap::new();
            for (i, issue) in check.issues.iter().enumerate() {
                details.insert(format!("issue_{i}"), issue.clone());
            }
            self.alerts.raise(
                &check.service,
                alert_type,
                severity,
                check.issues.join("; "),
                details,
            );
        }

        if health.health_percentage < self.config.degraded_threshold_percent {
            let severity = if health.health_percentage < 50.0 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Error
            };
            self.alerts.raise(
                "cluster",
                AlertType::ClusterDegraded,
                severity,
                format!(
                    "cluster certificate health at {:.1}% ({}/{} services healthy)",
                    health.health_percentage, health.healthy_services, health.total_services
                ),
                HashMap::new(),
            );
        } else {
            self.alerts.resolve_for_service("cluster");
        }

        Ok(())
    }

    /// Merge metrics, health, alerts, and inventories into one read-model.
    pub async fn dashboard_snapshot(&self) -> Result<DashboardSnapshot> {
        let status_counts = self.current_counts().await?;
        let health = self.perform_cluster_health_check().await?;

        let all = self.manager.store().list_all().await?;
        let now = self.clock.now();
        let mut certificates: Vec<CertificateSummary> = all
            .iter()
            .map(|(service, meta)| certificate_summary(service, meta, now))
            .collect();
        certificates.sort_by(|a, b| a.service.cmp(&b.service));

        // The secret inventory is best-effort: an unreachable cluster makes
        // for an empty mirror, not a failed snapshot.
        let secrets = match self.cluster.list_secret_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "snapshot could not list cluster secrets");
                Vec::new()
            }
        };

        Ok(DashboardSnapshot {
            timestamp: now,
            status_counts,
            health,
            alerts: AlertSummary {
                total: self.alerts.total(),
                by_severity: self.alerts.counts_by_severity(),
                recent: self.alerts.recent(self.config.recent_alerts),
            },
            certificates,
            secrets,
        })
    }

    /// Periodic metrics collection.
    pub fn start_metrics_collector(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = Duration::from_secs(this.config.metrics_interval_secs);
        tokio::spawn(async move {
            info!("metrics collector task started");
            let mut shutdown = shutdown;
            loop {
                if let Err(e) = this.collect_metrics().await {
                    error!(error = %e, "metrics collection failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("metrics collector task stopped");
        })
    }

    /// Periodic alert engine.
    pub fn start_alert_engine(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = Duration::from_secs(this.config.alert_interval_secs);
        tokio::spawn(async move {
            info!("alert engine task started");
            let mut shutdown = shutdown;
            loop {
                if let Err(e) = this.run_alert_cycle().await {
                    error!(error = %e, "alert cycle failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("alert engine task stopped");
        })
    }

    async fn current_counts(&self) -> Result<MetricsSnapshot> {
        let all = self.manager.store().list_all().await?;
        let mut snapshot = MetricsSnapshot {
            timestamp: self.clock.now(),
            valid: 0,
            expiring_soon: 0,
            expired: 0,
            revoked: 0,
            invalid: 0,
        };
        for meta in all.values() {
            match meta.status {
                CertificateStatus::Valid => snapshot.valid += 1,
                CertificateStatus::ExpiringSoon => snapshot.expiring_soon += 1,
                CertificateStatus::Expired => snapshot.expired += 1,
                CertificateStatus::Revoked => snapshot.revoked += 1,
                CertificateStatus::Invalid => snapshot.invalid += 1,
            }
        }
        Ok(snapshot)
    }
}

fn certificate_summary(
    service: &str,
    meta: &CertificateMetadata,
    now: SystemTime,
) -> CertificateSummary {
    CertificateSummary {
        service: service.to_string(),
        common_name: meta.common_name.clone(),
        status: meta.status,
        expires_at: meta.expires_at,
        days_until_expiry: meta.days_until_expiry(now),
        san_entries: meta.san_entries.clone(),
        serial: meta.serial.clone(),
    }
}

/// Extract N from a "certificate expires in N days" issue string.
fn expiring_days(issue: &str) -> Option<i64> {
    issue
        .strip_prefix("certificate expires in ")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    include!("dashboard_tests.rs");
}
