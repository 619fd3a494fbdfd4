// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The two cache tiers composed by the metadata loader.
//!
//! [`MemoryCache`] keeps parsed documents and evicts them after a period
//! without access. [`BlobStore`] keeps the raw bytes of the last successful
//! download per URL and never expires them.

mod disk;
mod memory;

pub use disk::{blob_name, BlobStore, FsBlobStore, InMemoryBlobStore, DOWNLOADED_METADATA_DIR};
pub use memory::MemoryCache;
