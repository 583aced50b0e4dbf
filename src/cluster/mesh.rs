//! Mesh policy objects.
//!
//! Declarative strict-mTLS enforcement: one fleet-wide PeerAuthentication
//! default plus a per-service PeerAuthentication/DestinationRule pair. The
//! destination rule carries transport tuning keyed on the service tier.

use super::{LABEL_MANAGED_BY, MANAGED_BY};
use crate::types::ServiceType;
use serde_json::{json, Value};

/// Fleet-wide strict-mTLS default, applied in the mesh root namespace.
pub fn fleet_peer_authentication(mesh_root_namespace: &str) -> Value {
    json!({
        "apiVersion": "security.istio.io/v1beta1",
        "kind": "PeerAuthentication",
        "metadata": {
            "name": "default",
            "namespace": mesh_root_namespace,
            "labels": { LABEL_MANAGED_BY: MANAGED_BY },
        },
        "spec": {
            "mtls": { "mode": "STRICT" },
        },
    })
}

/// Per-service strict-mTLS requirement, scoped by the app selector.
pub fn peer_authentication(service_name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": "security.istio.io/v1beta1",
        "kind": "PeerAuthentication",
        "metadata": {
            "name": format!("{service_name}-mtls"),
            "namespace": namespace,
            "labels": { LABEL_MANAGED_BY: MANAGED_BY },
        },
        "spec": {
            "selector": {
                "matchLabels": { "app": service_name },
            },
            "mtls": { "mode": "STRICT" },
        },
    })
}

/// Destination rule forcing mutual TLS toward the service's in-cluster DNS
/// host, with tier-specific transport tuning: storage tiers get tight
/// connection-pool limits, inference tiers get outlier detection.
pub fn destination_rule(
    service_name: &str,
    namespace: &str,
    service_type: ServiceType,
    cluster_domain: &str,
) -> Value {
    let mut traffic_policy = json!({
        "tls": { "mode": "ISTIO_MUTUAL" },
    });

    match service_type {
        ServiceType::Database | ServiceType::Cache => {
            traffic_policy["connectionPool"] = json!({
                "tcp": {
                    "maxConnections": 32,
                    "connectTimeout": "5s",
                },
            });
        }
        ServiceType::Inference => {
            traffic_policy["outlierDetection"] = json!({
                "consecutive5xxErrors": 5,
                "interval": "30s",
                "baseEjectionTime": "60s",
                "maxEjectionPercent": 50,
            });
        }
        _ => {}
    }

    json!({
        "apiVersion": "networking.istio.io/v1beta1",
        "kind": "DestinationRule",
        "metadata": {
            "name": format!("{service_name}-mtls"),
            "namespace": namespace,
            "labels": { LABEL_MANAGED_BY: MANAGED_BY },
        },
        "spec": {
            "host": format!("{service_name}.{namespace}.svc.{cluster_domain}"),
            "trafficPolicy": traffic_policy,
        },
    })
}
