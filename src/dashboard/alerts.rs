//! In-memory alert log.
//!
//! Alert lifecycle: created, optionally acknowledged, then resolved.
//! Retention is bounded; once the capacity is reached the oldest resolved
//! alert is dropped first, falling back to the oldest alert outright.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    CertificateExpiring,
    CertificateExpired,
    ServiceUnhealthy,
    ClusterDegraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub service: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: HashMap<String, String>,
    pub timestamp: SystemTime,
    pub acknowledged: bool,
    pub resolved: bool,
}

pub struct AlertLog {
    alerts: RwLock<Vec<Alert>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl AlertLog {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            capacity,
            clock,
        }
    }

    /// Raise an alert unless an unresolved one of the same (service, type)
    /// already exists. Returns the new alert id, or `None` if deduplicated.
    pub fn raise(
        &self,
        service: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        details: HashMap<String, String>,
    ) -> Option<String> {
        let mut alerts = self.alerts.write().unwrap();

        if alerts
            .iter()
            .any(|a| !a.resolved && a.service == service && a.alert_type == alert_type)
        {
            return None;
        }

        if alerts.len() >= self.capacity {
            if let Some(pos) = alerts.iter().position(|a| a.resolved) {
                alerts.remove(pos);
            } else {
                alerts.remove(0);
            }
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            service: service.to_string(),
            alert_type,
            severity,
            message: message.clone(),
            details,
            timestamp: self.clock.now(),
            acknowledged: false,
            resolved: false,
        };
        let id = alert.id.clone();
        warn!(service, ?alert_type, ?severity, message = %message, "alert raised");
        alerts.push(alert);
        Some(id)
    }

    /// Mark an alert acknowledged. Returns false for unknown ids.
    pub fn acknowledge(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write().unwrap();
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Mark an alert resolved. Returns false for unknown ids.
    pub fn resolve(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write().unwrap();
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.resolved = true;
                true
            }
            None => false,
        }
    }

    /// Resolve every open alert for a service, used when a health cycle
    /// finds it healthy again.
    pub fn resolve_for_service(&self, service: &str) {
        let mut alerts = self.alerts.write().unwrap();
        let mut resolved = 0;
        for alert in alerts.iter_mut() {
            if !alert.resolved && alert.service == service {
                alert.resolved = true;
                resolved += 1;
            }
        }
        if resolved > 0 {
            info!(service, count = resolved, "alerts auto-resolved");
        }
    }

    /// Unresolved alerts, oldest first.
    pub fn active(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .unwrap()
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    /// The most recent `n` alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let alerts = self.alerts.read().unwrap();
        alerts.iter().rev().take(n).cloned().collect()
    }

    pub fn total(&self) -> usize {
        self.alerts.read().unwrap().len()
    }

    /// Active alert counts per severity.
    pub fn counts_by_severity(&self) -> HashMap<AlertSeverity, usize> {
        let mut counts = HashMap::new();
        for alert in self.alerts.read().unwrap().iter() {
            if !alert.resolved {
                *counts.entry(alert.severity).or_insert(0) += 1;
            }
        }
        counts
    }
}
