// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Two-tier cached access to metadata documents.
//!
//! `get_fresh` always goes to the source and refreshes both tiers, while
//! `get_cached` only consults the memory tier and then the disk tier. Local
//! `file:` sources bypass the caches entirely.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{blob_name, BlobStore, MemoryCache};
use crate::document::MetadataDocument;
use crate::error::LoaderError;
use crate::http::MetadataDownloader;
use crate::telemetry::{CacheTier, MetadataTelemetry, NoopTelemetry};

/// Loader composing the downloader with the memory and disk caches.
pub struct CachedMetadataLoader {
    downloader: Arc<dyn MetadataDownloader>,
    blobs: Arc<dyn BlobStore>,
    memory: MemoryCache,
    telemetry: Arc<dyn MetadataTelemetry>,
}

impl CachedMetadataLoader {
    pub fn new(
        downloader: Arc<dyn MetadataDownloader>,
        blobs: Arc<dyn BlobStore>,
        memory: MemoryCache,
    ) -> Self {
        Self {
            downloader,
            blobs,
            memory,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    /// Replaces the telemetry sink notified of downloads and cache hits.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn MetadataTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.memory
    }

    /// Name of the disk blob holding the last download of `url`.
    pub fn file_name(url: &str) -> String {
        blob_name(url)
    }

    /// Retrieves the current document from its source and refreshes both cache tiers.
    ///
    /// The payload is parsed before it is persisted, so a malformed download
    /// never replaces the last good copy on disk.
    pub async fn get_fresh(
        &self,
        url: &str,
        truststore: Option<&str>,
    ) -> Result<Arc<MetadataDocument>, LoaderError> {
        if let Some(path) = local_path(url) {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| LoaderError::LocalRead { path, source })?;
            return Ok(Arc::new(MetadataDocument::parse(&bytes)?));
        }

        self.telemetry.on_download(url);
        let bytes = self.downloader.download(url, truststore).await?;
        let document = Arc::new(MetadataDocument::parse(&bytes)?);

        if let Err(err) = self.blobs.write(&blob_name(url), &bytes).await {
            warn!(url, error = %err, "failed to store downloaded metadata on disk");
        }
        self.memory.insert(url, document.clone());
        Ok(document)
    }

    /// Returns the cached document for `url`, consulting memory first and disk second.
    ///
    /// A disk blob that cannot be read or parsed is treated as absent.
    pub async fn get_cached(&self, url: &str) -> Option<Arc<MetadataDocument>> {
        if let Some(document) = self.memory.get(url) {
            self.telemetry.on_cache_hit(url, CacheTier::Memory);
            return Some(document);
        }

        let bytes = match self.blobs.read(&blob_name(url)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(url, "no cached metadata");
                return None;
            }
            Err(err) => {
                warn!(url, error = %err, "failed to read cached metadata from disk");
                return None;
            }
        };
        match MetadataDocument::parse(&bytes) {
            Ok(document) => {
                let document = Arc::new(document);
                self.memory.insert(url, document.clone());
                self.telemetry.on_cache_hit(url, CacheTier::Disk);
                debug!(url, "loaded metadata from disk cache");
                Some(document)
            }
            Err(err) => {
                warn!(url, error = %err, "ignoring corrupt cached metadata");
                None
            }
        }
    }
}

/// Filesystem path of a `file:` source, `None` for anything else.
///
/// Both `file:///abs/path` and the relative `file:dir/metadata.xml` forms are accepted.
pub(crate) fn local_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file:")?;
    if rest.starts_with("//") {
        reqwest::Url::parse(url).ok()?.to_file_path().ok()
    } else {
        Some(PathBuf::from(rest))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::InMemoryBlobStore;
    use crate::document::tests::FEDERATION_XML;
    use crate::error::DownloadError;
    use crate::telemetry::CountingTelemetry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) const URL: &str = "https://mds.example.org/metadata.xml";

    /// Downloader replaying scripted outcomes, then repeating a default body.
    #[derive(Default)]
    pub(crate) struct ScriptedDownloader {
        script: Mutex<VecDeque<Result<Vec<u8>, u16>>>,
        default_body: Mutex<Option<Vec<u8>>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedDownloader {
        pub(crate) fn serving(body: &[u8]) -> Self {
            let downloader = Self::default();
            *downloader.default_body.lock().unwrap() = Some(body.to_vec());
            downloader
        }

        /// Queues a failing attempt answered with the given HTTP status.
        pub(crate) fn fail_next(&self, status: u16) {
            self.script.lock().unwrap().push_back(Err(status));
        }

        pub(crate) fn set_body(&self, body: &[u8]) {
            *self.default_body.lock().unwrap() = Some(body.to_vec());
        }

        /// Every later unscripted attempt fails with a 404.
        pub(crate) fn stop_serving(&self) {
            *self.default_body.lock().unwrap() = None;
        }

        /// Makes every attempt take `delay` before answering.
        pub(crate) fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataDownloader for ScriptedDownloader {
        async fn download(
            &self,
            _url: &str,
            _truststore: Option<&str>,
        ) -> Result<Vec<u8>, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.script.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(DownloadError::Status {
                    status,
                    body: String::new(),
                }),
                None => self
                    .default_body
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or(DownloadError::Status {
                        status: 404,
                        body: String::new(),
                    }),
            }
        }
    }

    fn loader(
        downloader: Arc<ScriptedDownloader>,
        blobs: Arc<InMemoryBlobStore>,
    ) -> CachedMetadataLoader {
        CachedMetadataLoader::new(
            downloader,
            blobs,
            MemoryCache::new(Duration::from_secs(3600), 16),
        )
    }

    #[tokio::test]
    async fn test_get_fresh_populates_both_tiers() {
        let downloader = Arc::new(ScriptedDownloader::serving(FEDERATION_XML.as_bytes()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let loader = loader(downloader.clone(), blobs.clone());

        let document = loader.get_fresh(URL, None).await.expect("fresh document");
        assert_eq!(document.entities().len(), 2);
        assert_eq!(downloader.calls(), 1);
        assert_eq!(
            blobs
                .read(&CachedMetadataLoader::file_name(URL))
                .await
                .expect("read"),
            Some(FEDERATION_XML.as_bytes().to_vec())
        );
        assert_eq!(loader.memory_cache().get(URL), Some(document));
    }

    #[tokio::test]
    async fn test_get_fresh_propagates_download_errors() {
        let downloader = Arc::new(ScriptedDownloader::serving(FEDERATION_XML.as_bytes()));
        downloader.fail_next(500);
        let blobs = Arc::new(InMemoryBlobStore::new());
        let loader = loader(downloader, blobs.clone());

        let err = loader.get_fresh(URL, None).await.unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Download(DownloadError::Status { status: 500, .. })
        ));
        assert!(blobs.is_empty());
        assert!(loader.memory_cache().get(URL).is_none());
    }

    #[tokio::test]
    async fn test_malformed_download_keeps_previous_disk_copy() {
        let downloader = Arc::new(ScriptedDownloader::serving(FEDERATION_XML.as_bytes()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let loader = loader(downloader.clone(), blobs.clone());
        loader.get_fresh(URL, None).await.expect("first download");

        downloader.set_body(b"<html>maintenance</html>");
        let err = loader.get_fresh(URL, None).await.unwrap_err();
        assert!(matches!(err, LoaderError::Parse(_)));
        assert_eq!(
            blobs
                .read(&CachedMetadataLoader::file_name(URL))
                .await
                .expect("read"),
            Some(FEDERATION_XML.as_bytes().to_vec())
        );
    }

    #[tokio::test]
    async fn test_get_cached_round_trips_through_disk() {
        let downloader = Arc::new(ScriptedDownloader::default());
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs
            .write(&CachedMetadataLoader::file_name(URL), FEDERATION_XML.as_bytes())
            .await
            .expect("seed disk");
        let loader = loader(downloader.clone(), blobs);
        loader.memory_cache().clear();

        let cached = loader.get_cached(URL).await.expect("disk hit");
        let direct = MetadataDocument::parse(FEDERATION_XML.as_bytes()).expect("valid metadata");
        assert_eq!(*cached, direct);
        assert_eq!(downloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_get_cached_is_idempotent_without_network() {
        let downloader = Arc::new(ScriptedDownloader::default());
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs
            .write(&CachedMetadataLoader::file_name(URL), FEDERATION_XML.as_bytes())
            .await
            .expect("seed disk");
        let telemetry = CountingTelemetry::default();
        let loader = loader(downloader.clone(), blobs).with_telemetry(Arc::new(telemetry.clone()));

        let first = loader.get_cached(URL).await.expect("first lookup");
        let second = loader.get_cached(URL).await.expect("second lookup");
        assert_eq!(first, second);
        assert_eq!(downloader.calls(), 0);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.disk_hits, 1);
        assert_eq!(snapshot.memory_hits, 1);
        assert_eq!(snapshot.downloads, 0);
    }

    #[tokio::test]
    async fn test_get_cached_treats_corrupt_blob_as_absent() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs
            .write(&CachedMetadataLoader::file_name(URL), b"<EntitiesDescriptor>")
            .await
            .expect("seed disk");
        let loader = loader(Arc::new(ScriptedDownloader::default()), blobs);
        assert!(loader.get_cached(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_get_cached_misses_when_nothing_stored() {
        let loader = loader(
            Arc::new(ScriptedDownloader::default()),
            Arc::new(InMemoryBlobStore::new()),
        );
        assert!(loader.get_cached(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_memory_entry_falls_back_to_disk() {
        let downloader = Arc::new(ScriptedDownloader::serving(FEDERATION_XML.as_bytes()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let telemetry = CountingTelemetry::default();
        let loader = CachedMetadataLoader::new(
            downloader.clone(),
            blobs,
            MemoryCache::new(Duration::from_millis(100), 16),
        )
        .with_telemetry(Arc::new(telemetry.clone()));

        loader.get_fresh(URL, None).await.expect("fresh document");
        std::thread::sleep(Duration::from_millis(250));

        assert!(loader.memory_cache().get(URL).is_none());
        assert!(loader.get_cached(URL).await.is_some());
        assert_eq!(telemetry.snapshot().disk_hits, 1);
        assert_eq!(downloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_files_bypass_caches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metadata.xml");
        std::fs::write(&path, FEDERATION_XML).expect("write metadata");
        let url = format!("file://{}", path.display());

        let downloader = Arc::new(ScriptedDownloader::default());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let loader = loader(downloader.clone(), blobs.clone());

        let document = loader.get_fresh(&url, None).await.expect("local document");
        assert_eq!(document.entities().len(), 2);
        assert_eq!(downloader.calls(), 0);
        assert!(blobs.is_empty());
        assert!(loader.memory_cache().get(&url).is_none());
    }

    #[tokio::test]
    async fn test_missing_local_file_is_an_error() {
        let loader = loader(
            Arc::new(ScriptedDownloader::default()),
            Arc::new(InMemoryBlobStore::new()),
        );
        let err = loader
            .get_fresh("file:does/not/exist.xml", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::LocalRead { .. }));
    }

    #[test]
    fn test_local_path_accepts_both_forms() {
        assert_eq!(
            local_path("file:src/test/metadata.xml"),
            Some(PathBuf::from("src/test/metadata.xml"))
        );
        assert_eq!(
            local_path("file:///tmp/metadata.xml"),
            Some(PathBuf::from("/tmp/metadata.xml"))
        );
        assert_eq!(local_path("https://mds.example.org/metadata.xml"), None);
    }
}
