// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network retrieval of metadata documents.
//!
//! [`HttpMetadataDownloader`] performs plain GET requests. Sources pinned to a
//! named trust store are fetched with a dedicated client that trusts only that
//! store's roots; clients are built once per trust store and reused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Url};
use tracing::debug;

use crate::config::{MetadataServiceConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{ConfigError, DownloadError, MAX_ERROR_BODY_LEN};
use crate::truststore::TrustStoreResolver;

/// Fetches the raw bytes of a metadata document.
#[async_trait]
pub trait MetadataDownloader: Send + Sync {
    async fn download(&self, url: &str, truststore: Option<&str>)
        -> Result<Vec<u8>, DownloadError>;
}

/// Timeouts applied to every download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&MetadataServiceConfig> for HttpClientOptions {
    fn from(config: &MetadataServiceConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

/// Creates a reqwest client builder with rustls TLS and the configured timeouts.
fn create_client_builder(options: HttpClientOptions) -> ClientBuilder {
    reqwest::Client::builder()
        .use_rustls_tls()
        .connect_timeout(options.connect_timeout)
        .timeout(options.request_timeout)
}

/// HTTP(S) downloader with optional per-source trust stores.
pub struct HttpMetadataDownloader {
    default_client: Client,
    trust_stores: Arc<dyn TrustStoreResolver>,
    pinned_clients: Mutex<HashMap<String, Client>>,
    options: HttpClientOptions,
}

impl HttpMetadataDownloader {
    pub fn new(
        options: HttpClientOptions,
        trust_stores: Arc<dyn TrustStoreResolver>,
    ) -> Result<Self, ConfigError> {
        let default_client = create_client_builder(options)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            default_client,
            trust_stores,
            pinned_clients: Mutex::new(HashMap::new()),
            options,
        })
    }

    /// Returns the client trusting only the roots of `truststore`, building it on first use.
    fn pinned_client(&self, truststore: &str) -> Result<Client, DownloadError> {
        if let Some(client) = self
            .pinned_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(truststore)
        {
            return Ok(client.clone());
        }

        let roots = self.trust_stores.resolve(truststore)?;
        let client = roots
            .into_iter()
            .fold(
                create_client_builder(self.options).tls_built_in_root_certs(false),
                |builder, root| builder.add_root_certificate(root),
            )
            .build()?;
        debug!(truststore, "built HTTP client for trust store");

        let mut clients = self
            .pinned_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(clients
            .entry(truststore.to_string())
            .or_insert(client)
            .clone())
    }
}

#[async_trait]
impl MetadataDownloader for HttpMetadataDownloader {
    async fn download(
        &self,
        url: &str,
        truststore: Option<&str>,
    ) -> Result<Vec<u8>, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        let client = match (parsed.scheme(), truststore) {
            ("https", Some(truststore)) => self.pinned_client(truststore)?,
            ("http", _) | ("https", None) => self.default_client.clone(),
            (scheme, _) => return Err(DownloadError::UnsupportedScheme(scheme.to_string())),
        };

        debug!(url, ?truststore, "downloading metadata");
        let mut response = client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            let prefix = read_error_prefix(&mut response).await;
            return Err(DownloadError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&prefix).into_owned(),
            });
        }
        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "downloaded metadata");
        Ok(body.to_vec())
    }
}

/// Reads at most [`MAX_ERROR_BODY_LEN`] bytes of an error response.
///
/// The rest of the body is never pulled off the wire. A transport error ends
/// the read with whatever arrived so far.
async fn read_error_prefix(response: &mut reqwest::Response) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(MAX_ERROR_BODY_LEN);
    while prefix.len() < MAX_ERROR_BODY_LEN {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_ERROR_BODY_LEN - prefix.len());
                prefix.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "error response body ended early");
                break;
            }
        }
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::truststore::NoTrustStores;
    use mockito::Server;
    use std::io::Write;

    fn downloader() -> HttpMetadataDownloader {
        HttpMetadataDownloader::new(HttpClientOptions::default(), Arc::new(NoTrustStores))
            .expect("client builds")
    }

    #[tokio::test]
    async fn test_download_returns_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/metadata.xml")
            .with_status(200)
            .with_body("<EntitiesDescriptor/>")
            .create_async()
            .await;

        let url = format!("{}/metadata.xml", server.url());
        let body = downloader().download(&url, None).await.expect("download");
        assert_eq!(body, b"<EntitiesDescriptor/>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_keeps_bounded_body() {
        let mut server = Server::new_async().await;
        let long_body = "x".repeat(MAX_ERROR_BODY_LEN * 3);
        server
            .mock("GET", "/metadata.xml")
            .with_status(503)
            .with_body(&long_body)
            .create_async()
            .await;

        let url = format!("{}/metadata.xml", server.url());
        match downloader().download(&url, None).await {
            Err(DownloadError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body.len(), MAX_ERROR_BODY_LEN);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_error_body_is_cut_at_the_limit() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/metadata.xml")
            .with_status(502)
            .with_chunked_body(|w| {
                let chunk = vec![b'y'; 64 * 1024];
                for _ in 0..16 {
                    w.write_all(&chunk)?;
                }
                Ok(())
            })
            .create_async()
            .await;

        let url = format!("{}/metadata.xml", server.url());
        match downloader().download(&url, None).await {
            Err(DownloadError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "y".repeat(MAX_ERROR_BODY_LEN));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_error_body_is_kept_whole() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/metadata.xml")
            .with_status(404)
            .with_body("no such metadata")
            .create_async()
            .await;

        let url = format!("{}/metadata.xml", server.url());
        match downloader().download(&url, None).await {
            Err(DownloadError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such metadata");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_unsupported_scheme() {
        let err = downloader()
            .download("ftp://mds.example.org/metadata.xml", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedScheme(ref s) if s == "ftp"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_url() {
        let err = downloader().download("not a url", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_unknown_truststore_fails_before_connecting() {
        let err = downloader()
            .download("https://mds.example.org/metadata.xml", Some("federation"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TrustStore(_)));
    }
}
