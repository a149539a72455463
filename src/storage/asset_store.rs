use crate::common::{IdCaptureError, Result};
use crate::core::session::SubjectId;
use crate::core::submission::AttemptId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Document,
    Selfie,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Document => "document",
            AssetKind::Selfie => "selfie",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage key of one uploaded image: `{subject}/{kind}/{attempt}.{ext}`,
/// with the extension taken from the encoded bytes.
///
/// The attempt id keeps every retry in its own namespace, so a put for a new
/// attempt can never overwrite (or be confused with) an asset from a failed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPath(String);

impl AssetPath {
    pub fn for_attempt(subject: &SubjectId, kind: AssetKind, attempt: &AttemptId, bytes: &[u8]) -> Self {
        AssetPath(format!("{}/{}/{}.{}", subject, kind, attempt, image_extension(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub path: AssetPath,
    pub size: usize,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

impl StoredAsset {
    pub fn describe(path: AssetPath, bytes: &[u8]) -> Self {
        Self {
            path,
            size: bytes.len(),
            sha256: sha256_hex(bytes),
            uploaded_at: Utc::now(),
        }
    }
}

/// Binary asset storage collaborator.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores `bytes` at `path`, replacing anything already there.
    async fn put(&self, path: &AssetPath, bytes: &[u8]) -> Result<StoredAsset>;

    /// Best-effort removal. Missing paths are not an error; every path is
    /// attempted even if an earlier one fails.
    async fn delete(&self, paths: &[AssetPath]) -> Result<()>;
}

pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        tracing::debug!("FsAssetStore rooted at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &AssetPath) -> Result<PathBuf> {
        let relative = Path::new(path.as_str());
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(IdCaptureError::Storage(format!("Refusing asset path {}", path)));
        }
        Ok(self.root.join(relative))
    }

    pub async fn exists(&self, path: &AssetPath) -> Result<bool> {
        Ok(fs::try_exists(self.resolve(path)?).await?)
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn put(&self, path: &AssetPath, bytes: &[u8]) -> Result<StoredAsset> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let tmp = PathBuf::from(partial);
        fs::write(&tmp, bytes).await.map_err(|e| {
            IdCaptureError::Storage(format!("Failed to write {}: {}", path, e))
        })?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(IdCaptureError::Storage(format!("Failed to store {}: {}", path, e)));
        }

        tracing::debug!("Stored asset {} ({} bytes)", path, bytes.len());
        Ok(StoredAsset::describe(path.clone(), bytes))
    }

    async fn delete(&self, paths: &[AssetPath]) -> Result<()> {
        let mut failures = Vec::new();

        for path in paths {
            let target = match self.resolve(path) {
                Ok(t) => t,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };
            match fs::remove_file(&target).await {
                Ok(()) => tracing::debug!("Deleted asset {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => failures.push(format!("{}: {}", path, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(IdCaptureError::Storage(format!(
                "Failed to delete assets: {}",
                failures.join(", ")
            )))
        }
    }
}

/// File extension for encoded image bytes; `bin` when the format is unknown.
pub fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
