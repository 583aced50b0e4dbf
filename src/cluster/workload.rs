//! Workload certificate attachment.
//!
//! Rewrites a Deployment so its containers read the service's TLS secret
//! from a fixed mount path. The rewrite is idempotent: any previously
//! attached certificate volume, mount, or env var is removed before being
//! re-added, so repeated calls never accumulate duplicates. A pod-template
//! annotation carries the certificate serial so a rotation rolls the pods.

use super::ANNOTATION_SERIAL;
use crate::error::{CertmeshError, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, SecretVolumeSource, Volume, VolumeMount};
use std::collections::BTreeMap;

pub const CERT_VOLUME: &str = "certmesh-tls";
pub const CERT_MOUNT_PATH: &str = "/etc/certmesh/tls";

const ENV_PREFIX: &str = "CERTMESH_";

/// Attach (or re-attach) the certificate secret to every container of a
/// Deployment, replacing any prior attachment.
pub fn attach_certificate_volume(
    deployment: &mut Deployment,
    secret_name: &str,
    serial: &str,
) -> Result<()> {
    let spec = deployment
        .spec
        .as_mut()
        .ok_or_else(|| CertmeshError::Cluster("deployment has no spec".to_string()))?;
    let template = &mut spec.template;
    let pod_spec = template
        .spec
        .as_mut()
        .ok_or_else(|| CertmeshError::Cluster("deployment has no pod spec".to_string()))?;

    let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
    volumes.retain(|v| v.name != CERT_VOLUME);
    volumes.push(Volume {
        name: CERT_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            default_mode: Some(0o440),
            ..Default::default()
        }),
        ..Default::default()
    });

    for container in &mut pod_spec.containers {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        mounts.retain(|m| m.name != CERT_VOLUME);
        mounts.push(VolumeMount {
            name: CERT_VOLUME.to_string(),
            mount_path: CERT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });

        let env = container.env.get_or_insert_with(Vec::new);
        env.retain(|e| !e.name.starts_with(ENV_PREFIX));
        for (name, file) in [
            ("CERTMESH_CERT_PATH", "tls.crt"),
            ("CERTMESH_KEY_PATH", "tls.key"),
            ("CERTMESH_CA_PATH", "ca.crt"),
        ] {
            env.push(EnvVar {
                name: name.to_string(),
                value: Some(format!("{CERT_MOUNT_PATH}/{file}")),
                ..Default::default()
            });
        }
    }

    let annotations = template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations.insert(ANNOTATION_SERIAL.to_string(), serial.to_string());

    Ok(())
}
