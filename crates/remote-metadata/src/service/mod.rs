// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumer registration and per-source background refresh.

mod group;
pub(crate) mod handler;
mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use group::ConsumerGroup;
pub use registry::RemoteMetadataService;
