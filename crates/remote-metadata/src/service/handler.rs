// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-source refresh handling.
//!
//! A [`MetadataSourceHandler`] owns one source URL and the consumers
//! registered for it. A fixed-cadence background task checks whether the
//! effective refresh interval (the smallest interval any consumer asked for)
//! has elapsed and, if so, downloads the source and pushes the document to
//! every consumer.
//!
//! New consumers are fed the cached document, if any, regardless of whether a
//! refresh is running. Every consumer has its own delivery lane: deliveries to
//! one consumer never overlap, and a cached document is dropped once a fresh
//! one has reached that consumer.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::document::MetadataDocument;
use crate::loader::CachedMetadataLoader;
use crate::scheduler::{ScheduledTask, TaskScheduler};
use crate::source::{ConsumerId, MetadataConsumer, RemoteMetadataSrc};
use crate::telemetry::MetadataTelemetry;

/// Smallest refresh interval requested by `consumers`, `None` when there are none.
pub(crate) fn effective_interval<'a, I>(consumers: I) -> Option<Duration>
where
    I: IntoIterator<Item = &'a MetadataConsumer>,
{
    consumers.into_iter().map(|c| c.refresh_interval).min()
}

/// A registered consumer and its delivery lane.
#[derive(Clone)]
struct ConsumerEntry {
    consumer: MetadataConsumer,
    /// Locked for the whole of every delivery to this consumer; `true` once a
    /// document reached it.
    served: Arc<Mutex<bool>>,
}

impl ConsumerEntry {
    fn lock_served(&self) -> MutexGuard<'_, bool> {
        self.served.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mutable handler state, guarded by a single lock.
#[derive(Default)]
struct HandlerState {
    /// Ordered by id so deliveries follow registration order.
    consumers: BTreeMap<ConsumerId, ConsumerEntry>,
    refresh_interval: Option<Duration>,
    last_refresh: Option<Instant>,
    refresh_task: Option<ScheduledTask>,
}

impl HandlerState {
    fn recompute_interval(&mut self) {
        self.refresh_interval =
            effective_interval(self.consumers.values().map(|entry| &entry.consumer));
    }
}

struct HandlerShared {
    source: RemoteMetadataSrc,
    loader: Arc<CachedMetadataLoader>,
    scheduler: TaskScheduler,
    telemetry: Arc<dyn MetadataTelemetry>,
    rerun_interval: Duration,
    state: Mutex<HandlerState>,
    /// Serialises downloads of this source.
    refresh_guard: tokio::sync::Mutex<()>,
}

/// Handle to the refresh machinery of one source; clones share state.
#[derive(Clone)]
pub(crate) struct MetadataSourceHandler {
    shared: Arc<HandlerShared>,
}

impl MetadataSourceHandler {
    pub(crate) fn new(
        source: RemoteMetadataSrc,
        loader: Arc<CachedMetadataLoader>,
        scheduler: TaskScheduler,
        telemetry: Arc<dyn MetadataTelemetry>,
        rerun_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(HandlerShared {
                source,
                loader,
                scheduler,
                telemetry,
                rerun_interval,
                state: Mutex::new(HandlerState::default()),
                refresh_guard: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub(crate) fn source(&self) -> &RemoteMetadataSrc {
        &self.shared.source
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.shared.lock_state().consumers.len()
    }

    pub(crate) fn refresh_interval(&self) -> Option<Duration> {
        self.shared.lock_state().refresh_interval
    }

    pub(crate) fn last_refresh(&self) -> Option<Instant> {
        self.shared.lock_state().last_refresh
    }

    /// Registers a consumer and starts the periodic refresh for the first one.
    ///
    /// The consumer is not served here; call [`Self::seed_consumer`] once the
    /// caller has released its own locks.
    pub(crate) fn add_consumer(&self, consumer: MetadataConsumer) {
        let mut state = self.shared.lock_state();
        state.consumers.insert(
            consumer.id,
            ConsumerEntry {
                consumer,
                served: Arc::new(Mutex::new(false)),
            },
        );
        state.recompute_interval();
        if state.refresh_task.is_none() {
            state.refresh_task = Some(self.start_refresh_task());
            debug!(url = %self.shared.source.url, "started metadata refresh task");
        }
    }

    /// Serves a newly added consumer from cache, or submits a quick refresh when
    /// nothing is cached.
    pub(crate) async fn seed_consumer(&self, consumer: &MetadataConsumer) {
        match self.shared.loader.get_cached(&self.shared.source.url).await {
            Some(document) => self.shared.feed_with_cached(consumer.id, document),
            None => self.schedule_quick_refresh(consumer.id),
        }
    }

    /// Removes a consumer; returns whether it was the last one.
    ///
    /// Removing the last consumer cancels the periodic refresh.
    pub(crate) fn remove_consumer(&self, id: ConsumerId) -> bool {
        let mut state = self.shared.lock_state();
        state.consumers.remove(&id);
        state.recompute_interval();
        if !state.consumers.is_empty() {
            return false;
        }
        if let Some(task) = state.refresh_task.take() {
            task.cancel();
            debug!(url = %self.shared.source.url, "cancelled metadata refresh task");
        }
        true
    }

    /// Drops every consumer and cancels the periodic refresh.
    pub(crate) fn cancel(&self) {
        let mut state = self.shared.lock_state();
        state.consumers.clear();
        state.refresh_interval = None;
        if let Some(task) = state.refresh_task.take() {
            task.cancel();
        }
    }

    fn start_refresh_task(&self) -> ScheduledTask {
        let weak = Arc::downgrade(&self.shared);
        let rerun = self.shared.rerun_interval;
        self.shared
            .scheduler
            .schedule_with_fixed_delay(rerun, rerun, move || {
                let weak: Weak<HandlerShared> = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.tick().await;
                    }
                }
            })
    }

    fn schedule_quick_refresh(&self, consumer_id: ConsumerId) {
        let shared = self.shared.clone();
        debug!(url = %shared.source.url, %consumer_id, "scheduling quick metadata refresh");
        self.shared.scheduler.submit(async move {
            shared.quick_refresh(consumer_id).await;
        });
    }

    #[cfg(test)]
    pub(crate) async fn tick_now(&self) {
        self.shared.tick().await;
    }
}

impl HandlerShared {
    fn lock_state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: ConsumerId) -> Option<ConsumerEntry> {
        self.lock_state().consumers.get(&id).cloned()
    }

    /// Feeds a cached document unless a fresh one already reached the consumer.
    fn feed_with_cached(&self, id: ConsumerId, document: Arc<MetadataDocument>) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        let mut served = entry.lock_served();
        if *served {
            debug!(url = %self.source.url, consumer_id = %id, "consumer already has fresh metadata, skipping cached copy");
            return;
        }
        debug!(url = %self.source.url, consumer_id = %id, "feeding consumer with cached metadata");
        self.deliver(&entry.consumer, document);
        *served = true;
    }

    /// One wake-up of the periodic task.
    async fn tick(&self) {
        let _guard = self.refresh_guard.lock().await;
        {
            let state = self.lock_state();
            let Some(interval) = state.refresh_interval else {
                return;
            };
            if let Some(last_refresh) = state.last_refresh {
                let elapsed = last_refresh.elapsed();
                if elapsed < interval {
                    trace!(
                        url = %self.source.url,
                        remaining_ms = (interval - elapsed).as_millis() as u64,
                        "metadata refresh not due yet"
                    );
                    return;
                }
            }
        }
        self.refresh().await;
    }

    /// Refresh submitted for a consumer that could not be served from cache.
    ///
    /// Skipped once the consumer is gone or has been served by another refresh.
    async fn quick_refresh(&self, consumer_id: ConsumerId) {
        let _guard = self.refresh_guard.lock().await;
        let pending = self
            .entry(consumer_id)
            .is_some_and(|entry| !*entry.lock_served());
        if !pending {
            debug!(url = %self.source.url, %consumer_id, "quick refresh no longer needed");
            return;
        }
        self.refresh().await;
    }

    /// Downloads the source and notifies the consumers registered once the
    /// download completes.
    ///
    /// Must be called with `refresh_guard` held.
    async fn refresh(&self) {
        let url = &self.source.url;
        let document = match self
            .loader
            .get_fresh(url, self.source.truststore.as_deref())
            .await
        {
            Ok(document) => document,
            Err(err) => {
                error!(url = %url, error = %err, "failed to refresh metadata, will retry");
                self.telemetry.on_refresh_error(url, &err);
                return;
            }
        };

        let entries: Vec<ConsumerEntry> = {
            let mut state = self.lock_state();
            state.last_refresh = Some(Instant::now());
            state.consumers.values().cloned().collect()
        };
        self.telemetry.on_refresh_success(url);
        debug!(url = %url, consumers = entries.len(), "metadata refreshed");

        for entry in &entries {
            let mut served = entry.lock_served();
            self.deliver(&entry.consumer, document.clone());
            *served = true;
        }
    }

    /// Pushes a document to one consumer, containing any failure.
    ///
    /// Callers hold the consumer's delivery lane.
    fn deliver(&self, consumer: &MetadataConsumer, document: Arc<MetadataDocument>) {
        let url = &self.source.url;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            consumer.subscriber.on_metadata_updated(document, consumer.id)
        }));
        match outcome {
            Ok(Ok(())) => self.telemetry.on_delivery(url, consumer.id),
            Ok(Err(err)) => {
                error!(url = %url, consumer_id = %consumer.id, error = %err, "metadata consumer failed to process update");
                self.telemetry.on_delivery_error(url, consumer.id);
            }
            Err(_) => {
                error!(url = %url, consumer_id = %consumer.id, "metadata consumer panicked while processing update");
                self.telemetry.on_delivery_error(url, consumer.id);
            }
        }
    }
}
