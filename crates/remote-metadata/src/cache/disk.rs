// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

/// Workspace subdirectory holding downloaded metadata.
pub const DOWNLOADED_METADATA_DIR: &str = "downloadedMetadata";

/// Blob key of a source URL: the lowercase hex MD5 of the URL string.
///
/// The key depends on the URL only, so every download of a source replaces
/// the same blob.
pub fn blob_name(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Durable store of named raw blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the blob contents, or `None` when nothing was stored under `name`.
    async fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Stores `content` under `name`, replacing any previous blob.
    async fn write(&self, name: &str, content: &[u8]) -> io::Result<()>;
}

/// Blob store backed by files in `<workspace>/downloadedMetadata`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Opens the store below the given workspace root; directories are created lazily.
    pub fn new(workspace_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: workspace_dir.as_ref().join(DOWNLOADED_METADATA_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_of(name)).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write(&self, name: &str, content: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        // Write next to the target and rename so readers never observe a partial blob.
        let target = self.path_of(name);
        let staging = self.dir.join(format!("{name}.tmp"));
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &target).await?;
        debug!(path = %target.display(), bytes = content.len(), "stored downloaded metadata");
        Ok(())
    }
}

/// Blob store kept in process memory, for ephemeral deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(name).cloned())
    }

    async fn write(&self, name: &str, content: &[u8]) -> io::Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(name.to_string(), content.to_vec());
        Ok(())
    }
}
