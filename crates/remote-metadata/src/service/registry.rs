// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{FsBlobStore, MemoryCache};
use crate::config::MetadataServiceConfig;
use crate::error::ConfigError;
use crate::http::{HttpClientOptions, HttpMetadataDownloader};
use crate::loader::CachedMetadataLoader;
use crate::scheduler::TaskScheduler;
use crate::service::handler::MetadataSourceHandler;
use crate::source::{ConsumerId, MetadataConsumer, MetadataSubscriber, RemoteMetadataSrc};
use crate::telemetry::{MetadataTelemetry, NoopTelemetry};
use crate::truststore::{NoTrustStores, PemDirectoryTrustStores, TrustStoreResolver};

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, MetadataSourceHandler>,
    consumer_urls: HashMap<ConsumerId, String>,
}

/// Registration front-end for remote metadata consumers.
///
/// Consumers of the same URL share one handler, hence one download per
/// refresh. Each handler re-downloads its source at the smallest refresh
/// interval requested by its consumers and pushes the document to all of
/// them. Dropping the service cancels every background refresh.
pub struct RemoteMetadataService {
    loader: Arc<CachedMetadataLoader>,
    scheduler: TaskScheduler,
    telemetry: Arc<dyn MetadataTelemetry>,
    rerun_interval: Duration,
    next_consumer_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for RemoteMetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMetadataService")
            .field("rerun_interval", &self.rerun_interval)
            .field("sources", &self.source_count())
            .finish()
    }
}

impl RemoteMetadataService {
    /// Builds the service with an HTTP downloader and a disk cache under the
    /// configured workspace.
    pub fn new(
        config: &MetadataServiceConfig,
        scheduler: TaskScheduler,
    ) -> Result<Self, ConfigError> {
        Self::with_telemetry_sink(config, scheduler, Arc::new(NoopTelemetry))
    }

    /// Same as [`Self::new`], reporting loader and handler events to `telemetry`.
    pub fn with_telemetry_sink(
        config: &MetadataServiceConfig,
        scheduler: TaskScheduler,
        telemetry: Arc<dyn MetadataTelemetry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let trust_stores: Arc<dyn TrustStoreResolver> = match &config.truststore_dir {
            Some(dir) => Arc::new(PemDirectoryTrustStores::new(dir)),
            None => Arc::new(NoTrustStores),
        };
        let downloader =
            HttpMetadataDownloader::new(HttpClientOptions::from(config), trust_stores)?;
        let loader = CachedMetadataLoader::new(
            Arc::new(downloader),
            Arc::new(FsBlobStore::new(&config.workspace_dir)),
            MemoryCache::new(config.memory_cache_ttl, config.memory_cache_capacity),
        )
        .with_telemetry(telemetry.clone());
        Ok(
            Self::from_parts(Arc::new(loader), scheduler, config.rerun_interval)
                .with_telemetry(telemetry),
        )
    }

    /// Assembles the service from an already built loader.
    pub fn from_parts(
        loader: Arc<CachedMetadataLoader>,
        scheduler: TaskScheduler,
        rerun_interval: Duration,
    ) -> Self {
        Self {
            loader,
            scheduler,
            telemetry: Arc::new(NoopTelemetry),
            rerun_interval,
            next_consumer_id: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Replaces the telemetry sink used by source handlers created from now on.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn MetadataTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn loader(&self) -> &Arc<CachedMetadataLoader> {
        &self.loader
    }

    /// Registers `subscriber` for the metadata at `url` and returns its id.
    ///
    /// Never waits on the network. When the document is already cached the
    /// subscriber is served before this returns; otherwise a background
    /// download is started and the subscriber is notified when it completes.
    /// The trust store of the first consumer of a URL is kept; a different one
    /// passed by a later consumer is ignored with a warning.
    pub async fn register_consumer(
        &self,
        url: &str,
        refresh_interval: Duration,
        truststore: Option<String>,
        subscriber: Arc<dyn MetadataSubscriber>,
    ) -> ConsumerId {
        let id = ConsumerId::new(self.next_consumer_id.fetch_add(1, Ordering::Relaxed));
        let consumer = MetadataConsumer {
            id,
            refresh_interval,
            subscriber,
        };

        let handler = {
            let mut registry = self.lock_registry();
            let handler = registry
                .handlers
                .entry(url.to_string())
                .or_insert_with(|| {
                    debug!(url, "creating metadata source handler");
                    MetadataSourceHandler::new(
                        RemoteMetadataSrc::new(url, truststore.clone()),
                        self.loader.clone(),
                        self.scheduler.clone(),
                        self.telemetry.clone(),
                        self.rerun_interval,
                    )
                })
                .clone();
            if handler.source().truststore != truststore {
                warn!(
                    url,
                    requested = ?truststore,
                    retained = ?handler.source().truststore,
                    "consumer registered with a different truststore than the existing source, keeping the first one"
                );
            }
            handler.add_consumer(consumer.clone());
            registry.consumer_urls.insert(id, url.to_string());
            handler
        };
        debug!(url, consumer_id = %id, ?refresh_interval, "registered metadata consumer");

        handler.seed_consumer(&consumer).await;
        id
    }

    /// Removes a consumer. Unknown ids are ignored.
    ///
    /// Safe to call from within a subscriber callback.
    pub fn unregister_consumer(&self, id: ConsumerId) {
        let mut registry = self.lock_registry();
        let Some(url) = registry.consumer_urls.remove(&id) else {
            return;
        };
        let was_last = registry
            .handlers
            .get(&url)
            .is_some_and(|handler| handler.remove_consumer(id));
        if was_last {
            registry.handlers.remove(&url);
            debug!(url = %url, "removed metadata source handler");
        }
        debug!(url = %url, consumer_id = %id, "unregistered metadata consumer");
    }

    /// Unregisters every consumer and stops every background refresh.
    pub fn reset(&self) {
        let handlers = {
            let mut registry = self.lock_registry();
            registry.consumer_urls.clear();
            std::mem::take(&mut registry.handlers)
        };
        for handler in handlers.values() {
            handler.cancel();
        }
        debug!(sources = handlers.len(), "reset metadata service");
    }

    /// Number of sources with at least one consumer.
    pub fn source_count(&self) -> usize {
        self.lock_registry().handlers.len()
    }

    pub fn consumer_count(&self, url: &str) -> usize {
        self.handler(url)
            .map_or(0, |handler| handler.consumer_count())
    }

    /// Interval at which `url` is currently re-downloaded.
    pub fn effective_refresh_interval(&self, url: &str) -> Option<Duration> {
        self.handler(url)
            .and_then(|handler| handler.refresh_interval())
    }

    pub fn source_for(&self, url: &str) -> Option<RemoteMetadataSrc> {
        self.handler(url).map(|handler| handler.source().clone())
    }

    fn handler(&self, url: &str) -> Option<MetadataSourceHandler> {
        self.lock_registry().handlers.get(url).cloned()
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RemoteMetadataService {
    fn drop(&mut self) {
        self.reset();
    }
}
