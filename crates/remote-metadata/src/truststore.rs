// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resolution of named trust stores into root certificates.

use std::path::{Path, PathBuf};

use reqwest::Certificate;
use tracing::debug;

use crate::error::TrustStoreError;

/// Resolves an opaque trust store name into the roots used to validate a server.
pub trait TrustStoreResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Vec<Certificate>, TrustStoreError>;
}

/// Resolver for hosts without any named trust stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrustStores;

impl TrustStoreResolver for NoTrustStores {
    fn resolve(&self, name: &str) -> Result<Vec<Certificate>, TrustStoreError> {
        Err(TrustStoreError::Unknown(name.to_string()))
    }
}

/// Resolver reading PEM bundles from a directory, trust store `n` being `<dir>/<n>.pem`.
#[derive(Debug, Clone)]
pub struct PemDirectoryTrustStores {
    dir: PathBuf,
}

impl PemDirectoryTrustStores {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn bundle_path(&self, name: &str) -> Option<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        valid.then(|| self.dir.join(format!("{name}.pem")))
    }
}

impl TrustStoreResolver for PemDirectoryTrustStores {
    fn resolve(&self, name: &str) -> Result<Vec<Certificate>, TrustStoreError> {
        let path = self
            .bundle_path(name)
            .ok_or_else(|| TrustStoreError::Unknown(name.to_string()))?;
        let pem = match std::fs::read(&path) {
            Ok(pem) => pem,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrustStoreError::Unknown(name.to_string()))
            }
            Err(source) => {
                return Err(TrustStoreError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };
        let certificates =
            Certificate::from_pem_bundle(&pem).map_err(|source| TrustStoreError::InvalidPem {
                name: name.to_string(),
                source,
            })?;
        if certificates.is_empty() {
            return Err(TrustStoreError::Empty(name.to_string()));
        }
        debug!(
            truststore = name,
            certificates = certificates.len(),
            "loaded trust store"
        );
        Ok(certificates)
    }
}
