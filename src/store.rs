//! Durable certificate storage.
//!
//! Persists the four PEM artifacts per service under a base directory and
//! keeps an in-memory cache in front of the filesystem. Metadata is never
//! stored: it is recomputed from the certificate bytes on every load, so the
//! reported status can never drift from the artifact it describes.

use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::error::{CertmeshError, Result};
use crate::metadata::derive_metadata;
use crate::types::{CertificateBundle, CertificateMetadata, RevocationReason, StoredArtifacts};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const KEY_FILE: &str = "tls.key";
const CERT_FILE: &str = "tls.crt";
const CA_FILE: &str = "ca.crt";
const CHAIN_FILE: &str = "chain.pem";
const REVOKED_FILE: &str = "revoked.json";

/// Owner read/write only; the private key is never group-readable.
const KEY_MODE: u32 = 0o600;
/// Owner read/write, group read for the public artifacts.
const PUBLIC_MODE: u32 = 0o640;

pub struct CertificateStore {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, StoredArtifacts>>,
    revoked: RwLock<HashMap<String, RevocationReason>>,
    clock: Arc<dyn Clock>,
}

impl CertificateStore {
    pub async fn open(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        fs::create_dir_all(&config.path)
            .await
            .map_err(|e| CertmeshError::Storage(format!("failed to create store root: {e}")))?;

        let revoked = load_revocations(&config.path.join(REVOKED_FILE)).await?;
        if !revoked.is_empty() {
            info!(count = revoked.len(), "loaded revocation markers");
        }

        Ok(Self {
            base_path: config.path.clone(),
            cache: RwLock::new(HashMap::new()),
            revoked: RwLock::new(revoked),
            clock,
        })
    }

    /// Persist a service's bundle, replacing any prior artifacts.
    ///
    /// A write failure propagates; the caller must not assume persistence
    /// succeeded. The cache is only updated after all four files are on
    /// disk.
    pub async fn store(&self, service_name: &str, artifacts: &StoredArtifacts) -> Result<()> {
        let dir = self.service_dir(service_name)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CertmeshError::Storage(format!("failed to create bundle dir: {e}")))?;

        write_file(&dir.join(KEY_FILE), &artifacts.private_key_pem, KEY_MODE).await?;
        write_file(
            &dir.join(CERT_FILE),
            &artifacts.certificate_pem,
            PUBLIC_MODE,
        )
        .await?;
        write_file(
            &dir.join(CA_FILE),
            &artifacts.ca_certificate_pem,
            PUBLIC_MODE,
        )
        .await?;
        write_file(&dir.join(CHAIN_FILE), &artifacts.chain_pem, PUBLIC_MODE).await?;

        // A freshly stored bundle supersedes any revocation of its
        // predecessor.
        self.revoked.write().unwrap().remove(service_name);
        self.persist_revocations().await?;

        self.cache
            .write()
            .unwrap()
            .insert(service_name.to_string(), artifacts.clone());

        info!(service = service_name, "stored certificate bundle");
        Ok(())
    }

    /// Load a service's bundle, cache-first. Metadata is derived from the
    /// certificate bytes on every call. A never-issued service yields
    /// `Ok(None)`; an unreadable bundle is an error.
    pub async fn load(&self, service_name: &str) -> Result<Option<CertificateBundle>> {
        let revocation = self.revocation_of(service_name);

        let cached = self.cache.read().unwrap().get(service_name).cloned();
        if let Some(artifacts) = cached {
            return Ok(Some(self.bundle_from(service_name, artifacts, revocation)?));
        }

        let dir = self.service_dir(service_name)?;
        let certificate_pem = match fs::read_to_string(dir.join(CERT_FILE)).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(service = service_name, "no stored bundle");
                return Ok(None);
            }
            Err(e) => {
                return Err(CertmeshError::Storage(format!(
                    "failed to read certificate for {service_name}: {e}"
                )))
            }
        };

        let read = |file: &'static str| {
            let path = dir.join(file);
            async move {
                fs::read_to_string(&path).await.map_err(|e| {
                    CertmeshError::Storage(format!("failed to read {file} for bundle: {e}"))
                })
            }
        };
        let artifacts = StoredArtifacts {
            private_key_pem: read(KEY_FILE).await?,
            certificate_pem,
            ca_certificate_pem: read(CA_FILE).await?,
            chain_pem: read(CHAIN_FILE).await?,
        };

        self.cache
            .write()
            .unwrap()
            .insert(service_name.to_string(), artifacts.clone());

        Ok(Some(self.bundle_from(service_name, artifacts, revocation)?))
    }

    /// Names of every service with a stored or cached bundle.
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.cache.read().unwrap().keys().cloned().collect();

        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| CertmeshError::Storage(format!("failed to list store root: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CertmeshError::Storage(format!("failed to list store root: {e}")))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Metadata for every known service. A single unreadable bundle is
    /// logged and skipped so one corrupt entry cannot hide the rest.
    pub async fn list_all(&self) -> Result<HashMap<String, CertificateMetadata>> {
        let mut all = HashMap::new();
        for service in self.list_services().await? {
            match self.load(&service).await {
                Ok(Some(bundle)) => {
                    all.insert(service, bundle.metadata);
                }
                Ok(None) => {}
                Err(e) => warn!(service = %service, error = %e, "skipping unreadable bundle"),
            }
        }
        Ok(all)
    }

    /// Flag a service's active certificate as revoked. The marker survives
    /// restarts and is cleared by the next stored bundle.
    pub async fn mark_revoked(&self, service_name: &str, reason: RevocationReason) -> Result<()> {
        self.revoked
            .write()
            .unwrap()
            .insert(service_name.to_string(), reason);
        self.persist_revocations().await?;
        info!(service = service_name, ?reason, "marked certificate revoked");
        Ok(())
    }

    pub fn revocation_of(&self, service_name: &str) -> Option<RevocationReason> {
        self.revoked.read().unwrap().get(service_name).copied()
    }

    fn bundle_from(
        &self,
        service_name: &str,
        artifacts: StoredArtifacts,
        revocation: Option<RevocationReason>,
    ) -> Result<CertificateBundle> {
        let metadata = derive_metadata(
            service_name,
            &artifacts.certificate_pem,
            revocation,
            self.clock.now(),
        )?;
        Ok(CertificateBundle {
            private_key_pem: artifacts.private_key_pem,
            certificate_pem: artifacts.certificate_pem,
            ca_certificate_pem: artifacts.ca_certificate_pem,
            chain_pem: artifacts.chain_pem,
            metadata,
        })
    }

    fn service_dir(&self, service_name: &str) -> Result<PathBuf> {
        let sanitized: String = service_name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
            .collect();

        if sanitized.is_empty() || sanitized.contains("..") || sanitized != service_name {
            return Err(CertmeshError::Storage(format!(
                "invalid service name: {service_name:?}"
            )));
        }

        Ok(self.base_path.join(sanitized))
    }

    async fn persist_revocations(&self) -> Result<()> {
        let data = {
            let revoked = self.revoked.read().unwrap();
            serde_json::to_vec_pretty(&*revoked)?
        };
        let path = self.base_path.join(REVOKED_FILE);
        fs::write(&path, data)
            .await
            .map_err(|e| CertmeshError::Storage(format!("failed to persist revocations: {e}")))?;
        Ok(())
    }
}

async fn load_revocations(path: &std::path::Path) -> Result<HashMap<String, RevocationReason>> {
    match fs::read(path).await {
        Ok(data) => serde_json::from_slice(&data)
            .map_err(|e| CertmeshError::Storage(format!("corrupt revocation file: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(CertmeshError::Storage(format!(
            "failed to read revocation file: {e}"
        ))),
    }
}

async fn write_file(path: &std::path::Path, content: &str, mode: u32) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options
        .open(path)
        .await
        .map_err(|e| CertmeshError::Storage(format!("failed to open {}: {e}", path.display())))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| CertmeshError::Storage(format!("failed to write {}: {e}", path.display())))?;
    file.sync_all()
        .await
        .map_err(|e| CertmeshError::Storage(format!("failed to sync {}: {e}", path.display())))?;

    // An existing file keeps its old mode; re-assert the intended one.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| {
                CertmeshError::Storage(format!("failed to chmod {}: {e}", path.display()))
            })?;
    }

    Ok(())
}
