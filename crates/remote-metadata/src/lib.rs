// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public entry points for the remote metadata crate.
//!
//! The crate retrieves remote SAML federation metadata on behalf of many
//! consumers, deduplicating downloads per source URL, caching documents in
//! memory and on disk, and pushing refreshed documents to every registered
//! subscriber from a background refresh loop.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod http;
pub mod loader;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod telemetry;
pub mod truststore;

pub use cache::{blob_name, BlobStore, FsBlobStore, InMemoryBlobStore, MemoryCache};
pub use config::MetadataServiceConfig;
pub use document::{EntitySummary, MetadataDocument, RootKind};
pub use error::{ConfigError, DownloadError, LoaderError, ParseError, TrustStoreError};
pub use http::{HttpClientOptions, HttpMetadataDownloader, MetadataDownloader};
pub use loader::CachedMetadataLoader;
pub use scheduler::{ScheduledTask, TaskScheduler};
pub use service::{ConsumerGroup, RemoteMetadataService};
pub use source::{
    subscriber_fn, ConsumerId, MetadataConsumer, MetadataSubscriber, MetadataUpdate,
    RemoteMetadataSrc, SubscriberError,
};
pub use telemetry::{
    CacheTier, CountingTelemetry, MetadataTelemetry, NoopTelemetry, TelemetryCounters,
    TelemetrySnapshot,
};
pub use truststore::{NoTrustStores, PemDirectoryTrustStores, TrustStoreResolver};
