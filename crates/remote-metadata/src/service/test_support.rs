// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the service tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{BlobStore, InMemoryBlobStore, MemoryCache};
use crate::document::tests::FEDERATION_XML;
use crate::document::MetadataDocument;
use crate::loader::CachedMetadataLoader;
use crate::scheduler::TaskScheduler;
use crate::service::handler::MetadataSourceHandler;
use crate::service::RemoteMetadataService;
use crate::source::{subscriber_fn, ConsumerId, MetadataSubscriber, RemoteMetadataSrc};
use crate::telemetry::CountingTelemetry;

pub(crate) use crate::loader::tests::{ScriptedDownloader, URL};

pub(crate) const RERUN: Duration = Duration::from_millis(1_000);

/// In-memory loader stack with a scripted network.
pub(crate) struct Fixture {
    pub(crate) downloader: Arc<ScriptedDownloader>,
    pub(crate) blobs: Arc<InMemoryBlobStore>,
    pub(crate) telemetry: CountingTelemetry,
    pub(crate) loader: Arc<CachedMetadataLoader>,
    pub(crate) scheduler: TaskScheduler,
}

impl Fixture {
    /// Must be called from within a tokio runtime.
    pub(crate) fn new() -> Self {
        let downloader = Arc::new(ScriptedDownloader::serving(FEDERATION_XML.as_bytes()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let telemetry = CountingTelemetry::default();
        let loader = Arc::new(
            CachedMetadataLoader::new(
                downloader.clone(),
                blobs.clone(),
                MemoryCache::new(Duration::from_secs(3600), 16),
            )
            .with_telemetry(Arc::new(telemetry.clone())),
        );
        Self {
            downloader,
            blobs,
            telemetry,
            loader,
            scheduler: TaskScheduler::current().expect("tokio runtime"),
        }
    }

    pub(crate) fn handler(&self, url: &str) -> MetadataSourceHandler {
        MetadataSourceHandler::new(
            RemoteMetadataSrc::new(url, None),
            self.loader.clone(),
            self.scheduler.clone(),
            Arc::new(self.telemetry.clone()),
            RERUN,
        )
    }

    pub(crate) fn service(&self) -> RemoteMetadataService {
        RemoteMetadataService::from_parts(self.loader.clone(), self.scheduler.clone(), RERUN)
            .with_telemetry(Arc::new(self.telemetry.clone()))
    }

    /// Stores the federation document as if an earlier process had downloaded it.
    pub(crate) async fn seed_disk(&self, url: &str) {
        self.blobs
            .write(&CachedMetadataLoader::file_name(url), FEDERATION_XML.as_bytes())
            .await
            .expect("seed disk cache");
    }
}

/// Subscriber recording every delivery it receives.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    deliveries: Arc<Mutex<Vec<(ConsumerId, Arc<MetadataDocument>)>>>,
}

impl Recorder {
    pub(crate) fn subscriber(&self) -> Arc<dyn MetadataSubscriber> {
        let deliveries = self.deliveries.clone();
        subscriber_fn(move |document, id| {
            deliveries.lock().unwrap().push((id, document));
            Ok(())
        })
    }

    pub(crate) fn total(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    pub(crate) fn count_for(&self, id: ConsumerId) -> usize {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(delivered_to, _)| *delivered_to == id)
            .count()
    }
}
