//! Temporary image storage for in-progress podcast sessions. Staged files
//! live under `<root>/staging/`; promotion moves them into `<root>/` where
//! the web server publishes them, discarding removes the staged copy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AssetError;

pub(crate) const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub(crate) fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Detects the upload's format from its leading bytes.
pub(crate) fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpeg)
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(ImageFormat::Png)
    } else {
        None
    }
}

/// Reference to a staged upload, carried inside the session payload. The
/// name is scoped by owner id and staging instant, so cleanup of one session
/// can never hit an asset a completed podcast still references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StagedAsset {
    pub file_name: String,
}

pub(crate) trait AssetStore {
    async fn stage(&self, owner: i64, data: &[u8]) -> Result<StagedAsset, AssetError>;

    /// Makes the asset durable and independent of the session, returning the
    /// public URL to embed in outbound messages. Only called on confirm.
    async fn promote(&self, asset: &StagedAsset) -> Result<String, AssetError>;

    /// Removes the staged copy. Called on cancel and on confirm-time
    /// failure; unknown references are a no-op.
    async fn discard(&self, asset: &StagedAsset) -> Result<(), AssetError>;
}

pub(crate) struct FsAssetStore {
    root: PathBuf,
    base_url: String,
    seq: AtomicU64,
}

impl FsAssetStore {
    pub(crate) fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
            seq: AtomicU64::new(0),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn staged_path(&self, asset: &StagedAsset) -> PathBuf {
        self.staging_dir().join(&asset.file_name)
    }
}

impl AssetStore for FsAssetStore {
    async fn stage(&self, owner: i64, data: &[u8]) -> Result<StagedAsset, AssetError> {
        let ext = sniff_format(data)
            .map(ImageFormat::extension)
            .unwrap_or("jpg");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}_{}_{}.{}",
            owner,
            Utc::now().timestamp_millis(),
            seq,
            ext
        );
        tokio::fs::create_dir_all(self.staging_dir()).await?;
        let asset = StagedAsset { file_name };
        tokio::fs::write(self.staged_path(&asset), data).await?;
        log::info!("staged podcast image {} for {}", asset.file_name, owner);
        Ok(asset)
    }

    async fn promote(&self, asset: &StagedAsset) -> Result<String, AssetError> {
        let published = self.root.join(&asset.file_name);
        tokio::fs::rename(self.staged_path(asset), &published).await?;
        log::info!("promoted podcast image {}", asset.file_name);
        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), asset.file_name))
    }

    async fn discard(&self, asset: &StagedAsset) -> Result<(), AssetError> {
        match tokio::fs::remove_file(self.staged_path(asset)).await {
            Ok(()) => {
                log::info!("discarded staged image {}", asset.file_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_bytes() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend_from_slice(&[0u8; 32]);
        data
    }

    fn temp_store() -> FsAssetStore {
        let root = std::env::temp_dir().join(format!("minerbot-assets-{}", uuid::Uuid::new_v4()));
        FsAssetStore::new(root, "https://cdn.example/podcasts")
    }

    #[tokio::test]
    async fn stage_then_promote_publishes_the_file() {
        let store = temp_store();
        let asset = store.stage(42, &jpeg_bytes()).await.unwrap();
        assert!(asset.file_name.starts_with("42_"));
        assert!(asset.file_name.ends_with(".jpg"));
        assert!(store.staged_path(&asset).exists());

        let url = store.promote(&asset).await.unwrap();
        assert_eq!(url, format!("https://cdn.example/podcasts/{}", asset.file_name));
        assert!(!store.staged_path(&asset).exists());
        assert!(store.root.join(&asset.file_name).exists());
    }

    #[tokio::test]
    async fn discard_removes_staged_copy_and_tolerates_absence() {
        let store = temp_store();
        let asset = store.stage(7, &jpeg_bytes()).await.unwrap();
        store.discard(&asset).await.unwrap();
        assert!(!store.staged_path(&asset).exists());
        // second discard is a no-op
        store.discard(&asset).await.unwrap();
    }

    #[tokio::test]
    async fn staged_names_never_collide() {
        let store = temp_store();
        let a = store.stage(9, &jpeg_bytes()).await.unwrap();
        let b = store.stage(9, &jpeg_bytes()).await.unwrap();
        assert_ne!(a.file_name, b.file_name);
    }

    #[tokio::test]
    async fn png_uploads_keep_their_extension() {
        let store = temp_store();
        let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let asset = store.stage(1, &png).await.unwrap();
        assert!(asset.file_name.ends_with(".png"));
    }
}
