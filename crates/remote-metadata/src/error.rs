// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Maximum number of response body bytes kept on a failed download.
pub const MAX_ERROR_BODY_LEN: usize = 1024;

/// Errors raised while fetching a metadata document over the network.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid metadata url {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme '{0}', only http and https can be downloaded")]
    UnsupportedScheme(String),

    #[error("metadata server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("trust store error: {0}")]
    TrustStore(#[from] TrustStoreError),
}

/// Errors raised while parsing a metadata document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("metadata is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed metadata XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("metadata document has no root element")]
    Empty,

    #[error("unexpected root element '{0}', expected EntitiesDescriptor or EntityDescriptor")]
    UnexpectedRoot(String),

    #[error("metadata document ends with {0} unclosed element(s)")]
    Unbalanced(usize),

    #[error("EntityDescriptor without entityID attribute")]
    MissingEntityId,
}

/// Errors raised while resolving a named trust store.
#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error("unknown trust store '{0}'")]
    Unknown(String),

    #[error("failed to read trust store '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("trust store '{name}' holds invalid PEM data: {source}")]
    InvalidPem {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("trust store '{0}' contains no certificates")]
    Empty(String),
}

/// Errors surfaced by the cached metadata loader.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to read local metadata {path}: {source}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised when building or validating the service configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("No tokio runtime available to run background tasks")]
    NoRuntime,
}
