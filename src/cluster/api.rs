//! Cluster API seam.
//!
//! The orchestrator talks to the cluster through this trait so the
//! projection logic stays testable without a live control plane. The real
//! implementation wraps a kube client and puts an explicit deadline on
//! every call.

use crate::error::{CertmeshError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{
    DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::discovery::ApiResource;
use kube::{Api, Client};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Whether an apply created a new object or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create the secret, or update it in place if it already exists.
    /// "Already exists" is not an error; anything else is.
    async fn apply_secret(&self, namespace: &str, secret: Secret) -> Result<ApplyOutcome>;

    /// List secrets across all namespaces matching a label selector.
    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>>;

    /// Delete a secret; deleting an already-gone secret succeeds.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn replace_deployment(&self, namespace: &str, deployment: Deployment) -> Result<()>;

    /// Server-side apply of an arbitrary manifest (mesh policy objects).
    async fn apply_manifest(
        &self,
        namespace: Option<&str>,
        manifest: &serde_json::Value,
    ) -> Result<()>;
}

pub struct KubeClusterApi {
    client: Client,
    timeout: Duration,
    field_manager: String,
}

impl KubeClusterApi {
    pub fn new(client: Client, timeout: Duration, field_manager: String) -> Self {
        Self {
            client,
            timeout,
            field_manager,
        }
    }

    /// Connect using the ambient kubeconfig / in-cluster environment.
    pub async fn connect(timeout: Duration, field_manager: String) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| CertmeshError::Cluster(format!("failed to build cluster client: {e}")))?;
        Ok(Self::new(client, timeout, field_manager))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CertmeshError::Timeout),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn apply_secret(&self, namespace: &str, secret: Secret) -> Result<ApplyOutcome> {
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or_else(|| CertmeshError::Cluster("secret has no name".to_string()))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        match self.bounded(api.create(&PostParams::default(), &secret)).await {
            Ok(_) => {
                info!(namespace, name = %name, "created secret");
                Ok(ApplyOutcome::Created)
            }
            Err(CertmeshError::KubeApi(kube::Error::Api(ae))) if ae.code == 409 => {
                debug!(namespace, name = %name, "secret exists, applying update");
                self.bounded(api.patch(
                    &name,
                    &PatchParams::apply(&self.field_manager).force(),
                    &Patch::Apply(&secret),
                ))
                .await?;
                info!(namespace, name = %name, "updated secret");
                Ok(ApplyOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let params = ListParams::default().labels(label_selector);
        let list = self.bounded(api.list(&params)).await?;
        Ok(list.items)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match self.bounded(api.delete(name, &DeleteParams::default())).await {
            Ok(_) => Ok(()),
            Err(CertmeshError::KubeApi(kube::Error::Api(ae))) if ae.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.bounded(api.get_opt(name)).await
    }

    async fn replace_deployment(&self, namespace: &str, deployment: Deployment) -> Result<()> {
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| CertmeshError::Cluster("deployment has no name".to_string()))?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.bounded(api.replace(&name, &PostParams::default(), &deployment))
            .await?;
        Ok(())
    }

    async fn apply_manifest(
        &self,
        namespace: Option<&str>,
        manifest: &serde_json::Value,
    ) -> Result<()> {
        let api_version = manifest["apiVersion"]
            .as_str()
            .ok_or_else(|| CertmeshError::Cluster("manifest missing apiVersion".to_string()))?;
        let kind = manifest["kind"]
            .as_str()
            .ok_or_else(|| CertmeshError::Cluster("manifest missing kind".to_string()))?;
        let name = manifest["metadata"]["name"]
            .as_str()
            .ok_or_else(|| CertmeshError::Cluster("manifest missing metadata.name".to_string()))?;

        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk(&gvk);

        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };

        self.bounded(api.patch(
            name,
            &PatchParams::apply(&self.field_manager).force(),
            &Patch::Apply(manifest),
        ))
        .await?;
        debug!(kind, name, "applied manifest");
        Ok(())
    }
}
