// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry hooks for metadata retrieval.
//!
//! Embedders can implement [`MetadataTelemetry`] to observe downloads, cache
//! hits and deliveries without depending on the internal service state. A
//! no-op implementation and an atomic counting implementation are provided.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::LoaderError;
use crate::source::ConsumerId;

/// Cache tier that satisfied a cached lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Disk,
}

/// Telemetry hook invoked on significant retrieval events.
pub trait MetadataTelemetry: Send + Sync {
    /// Called right before a network download starts.
    fn on_download(&self, _url: &str) {}
    /// Called when a cached lookup is answered by one of the cache tiers.
    fn on_cache_hit(&self, _url: &str, _tier: CacheTier) {}
    /// Called after a source refresh produced a new document.
    fn on_refresh_success(&self, _url: &str) {}
    /// Called when a source refresh fails.
    fn on_refresh_error(&self, _url: &str, _error: &LoaderError) {}
    /// Called after a subscriber accepted a document.
    fn on_delivery(&self, _url: &str, _consumer_id: ConsumerId) {}
    /// Called when a subscriber rejected a document or panicked.
    fn on_delivery_error(&self, _url: &str, _consumer_id: ConsumerId) {}
}

/// Default telemetry implementation that performs no-ops.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl MetadataTelemetry for NoopTelemetry {}

/// Aggregated telemetry counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    downloads: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    refresh_success: AtomicU64,
    refresh_error: AtomicU64,
    deliveries: AtomicU64,
    delivery_errors: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            downloads: self.downloads.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            refresh_success: self.refresh_success.load(Ordering::Relaxed),
            refresh_error: self.refresh_error.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub downloads: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub refresh_success: u64,
    pub refresh_error: u64,
    pub deliveries: u64,
    pub delivery_errors: u64,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloads={}, memory_hits={}, disk_hits={}, refresh_success={}, refresh_error={}, deliveries={}, delivery_errors={}",
            self.downloads,
            self.memory_hits,
            self.disk_hits,
            self.refresh_success,
            self.refresh_error,
            self.deliveries,
            self.delivery_errors
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone, Default)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.counters.snapshot()
    }
}

impl MetadataTelemetry for CountingTelemetry {
    fn on_download(&self, _url: &str) {
        self.counters.downloads.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cache_hit(&self, _url: &str, tier: CacheTier) {
        let counter = match tier {
            CacheTier::Memory => &self.counters.memory_hits,
            CacheTier::Disk => &self.counters.disk_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_refresh_success(&self, _url: &str) {
        self.counters.refresh_success.fetch_add(1, Ordering::Relaxed);
    }

    fn on_refresh_error(&self, _url: &str, _error: &LoaderError) {
        self.counters.refresh_error.fetch_add(1, Ordering::Relaxed);
    }

    fn on_delivery(&self, _url: &str, _consumer_id: ConsumerId) {
        self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    fn on_delivery_error(&self, _url: &str, _consumer_id: ConsumerId) {
        self.counters.delivery_errors.fetch_add(1, Ordering::Relaxed);
    }
}
