// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::document::MetadataDocument;

/// Bounded in-memory cache of parsed documents keyed by source URL.
///
/// Entries expire after `ttl` without being read; reads reset the idle timer.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Arc<MetadataDocument>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_idle(ttl)
            .build();
        Self { entries }
    }

    pub fn get(&self, url: &str) -> Option<Arc<MetadataDocument>> {
        self.entries.get(url)
    }

    pub fn insert(&self, url: &str, document: Arc<MetadataDocument>) {
        self.entries.insert(url.to_string(), document);
    }

    pub fn invalidate(&self, url: &str) {
        self.entries.invalidate(url);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Number of live entries after pending evictions have been applied.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
