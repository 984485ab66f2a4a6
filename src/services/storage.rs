//! Blob storage seam.

use std::path::{Component, Path, PathBuf};

use anyhow::bail;
use async_trait::async_trait;

/// Content storage for uploaded files.
///
/// Paths returned by `upload` are opaque references; callers only ever
/// pass them back to `download` and `delete`.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store content for a user, returning its storage reference.
    async fn upload(&self, user_id: i64, filename: &str, content: &[u8]) -> anyhow::Result<String>;

    /// Fetch stored content. `None` means the blob does not exist, as
    /// opposed to a transient storage failure.
    async fn download(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Remove a blob, returning whether it existed.
    async fn delete(&self, path: &str) -> anyhow::Result<bool>;
}

/// Filesystem-backed blob storage for single-node deployments.
///
/// Content lives under `{root}/user_{id}/{filename}`.
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a storage reference, rejecting paths that escape the root.
    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let escapes = Path::new(path).components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            bail!("invalid blob path: {path}");
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn upload(&self, user_id: i64, filename: &str, content: &[u8]) -> anyhow::Result<String> {
        let reference = format!("user_{user_id}/{filename}");
        let full = self.resolve(&reference)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(reference)
    }

    async fn download(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, path: &str) -> anyhow::Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
