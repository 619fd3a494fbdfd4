// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Value types describing metadata sources, consumers and their subscribers.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::document::MetadataDocument;

/// Error a subscriber may return from a delivery; it is logged and otherwise ignored.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// A remote (or local `file:`) metadata location and the trust store used to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteMetadataSrc {
    pub url: String,
    /// Name of a trust store resolved by the PKI layer; `None` uses system roots.
    pub truststore: Option<String>,
}

impl RemoteMetadataSrc {
    pub fn new(url: impl Into<String>, truststore: Option<String>) -> Self {
        Self {
            url: url.into(),
            truststore,
        }
    }
}

impl fmt::Display for RemoteMetadataSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.truststore {
            Some(truststore) => write!(f, "{} (truststore {})", self.url, truststore),
            None => f.write_str(&self.url),
        }
    }
}

/// Identifier handed out for every registered consumer.
///
/// Ids are allocated from a per-service counter and display as the decimal
/// number, which is the form hosts persist or log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConsumerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Receiver of metadata pushes.
///
/// Deliveries for one source are issued by a single task at a time, in
/// chronological order; deliveries for different sources may run
/// concurrently. Implementations must not block for long since the source's
/// refresh loop waits for them.
pub trait MetadataSubscriber: Send + Sync {
    fn on_metadata_updated(
        &self,
        document: Arc<MetadataDocument>,
        consumer_id: ConsumerId,
    ) -> Result<(), SubscriberError>;
}

/// Adapter turning a closure into a [`MetadataSubscriber`].
pub struct FnSubscriber<F>(F);

impl<F> MetadataSubscriber for FnSubscriber<F>
where
    F: Fn(Arc<MetadataDocument>, ConsumerId) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_metadata_updated(
        &self,
        document: Arc<MetadataDocument>,
        consumer_id: ConsumerId,
    ) -> Result<(), SubscriberError> {
        (self.0)(document, consumer_id)
    }
}

/// Wraps a closure as a shareable subscriber.
pub fn subscriber_fn<F>(f: F) -> Arc<dyn MetadataSubscriber>
where
    F: Fn(Arc<MetadataDocument>, ConsumerId) -> Result<(), SubscriberError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnSubscriber(f))
}

/// Message sent by the channel-based subscriber.
#[derive(Debug, Clone)]
pub struct MetadataUpdate {
    pub consumer_id: ConsumerId,
    pub document: Arc<MetadataDocument>,
}

impl MetadataSubscriber for mpsc::UnboundedSender<MetadataUpdate> {
    fn on_metadata_updated(
        &self,
        document: Arc<MetadataDocument>,
        consumer_id: ConsumerId,
    ) -> Result<(), SubscriberError> {
        self.send(MetadataUpdate {
            consumer_id,
            document,
        })
        .map_err(|_| "metadata update receiver dropped".into())
    }
}

/// A registered consumer of one source.
#[derive(Clone)]
pub struct MetadataConsumer {
    pub id: ConsumerId,
    /// How often this consumer wants the source re-downloaded.
    pub refresh_interval: Duration,
    pub subscriber: Arc<dyn MetadataSubscriber>,
}

impl fmt::Debug for MetadataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataConsumer")
            .field("id", &self.id)
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::FEDERATION_XML;

    fn sample_document() -> Arc<MetadataDocument> {
        Arc::new(MetadataDocument::parse(FEDERATION_XML.as_bytes()).expect("valid metadata"))
    }

    #[test]
    fn test_consumer_id_round_trips_through_string() {
        let id = ConsumerId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<ConsumerId>().expect("numeric id"), id);
        assert!("forty-two".parse::<ConsumerId>().is_err());
    }

    #[test]
    fn test_source_display_mentions_truststore() {
        let plain = RemoteMetadataSrc::new("https://mds.example.org/metadata.xml", None);
        assert_eq!(plain.to_string(), "https://mds.example.org/metadata.xml");
        let pinned = RemoteMetadataSrc::new(
            "https://mds.example.org/metadata.xml",
            Some("federation".into()),
        );
        assert_eq!(
            pinned.to_string(),
            "https://mds.example.org/metadata.xml (truststore federation)"
        );
    }

    #[test]
    fn test_fn_subscriber_forwards_arguments() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscriber = subscriber_fn(move |doc, id| {
            sink.lock().unwrap().push((id, doc.entities().len()));
            Ok(())
        });
        subscriber
            .on_metadata_updated(sample_document(), ConsumerId::new(7))
            .expect("delivery succeeds");
        assert_eq!(*seen.lock().unwrap(), vec![(ConsumerId::new(7), 2)]);
    }

    #[tokio::test]
    async fn test_channel_subscriber_sends_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_metadata_updated(sample_document(), ConsumerId::new(3))
            .expect("delivery succeeds");
        let update = rx.recv().await.expect("update received");
        assert_eq!(update.consumer_id, ConsumerId::new(3));
        assert_eq!(update.document.entities().len(), 2);

        drop(rx);
        assert!(tx
            .on_metadata_updated(sample_document(), ConsumerId::new(3))
            .is_err());
    }
}
