// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::service::RemoteMetadataService;
use crate::source::{ConsumerId, MetadataSubscriber};

/// Consumers registered on behalf of one component, released together.
///
/// Dropping the group unregisters everything it still holds.
#[derive(Debug)]
pub struct ConsumerGroup {
    service: Arc<RemoteMetadataService>,
    ids: Mutex<Vec<ConsumerId>>,
}

impl ConsumerGroup {
    pub fn new(service: Arc<RemoteMetadataService>) -> Self {
        Self {
            service,
            ids: Mutex::new(Vec::new()),
        }
    }

    /// Registers a consumer through the shared service and remembers its id.
    pub async fn register(
        &self,
        url: &str,
        refresh_interval: Duration,
        truststore: Option<String>,
        subscriber: Arc<dyn MetadataSubscriber>,
    ) -> ConsumerId {
        let id = self
            .service
            .register_consumer(url, refresh_interval, truststore, subscriber)
            .await;
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        id
    }

    pub fn unregister_all(&self) {
        let ids = std::mem::take(&mut *self.ids.lock().unwrap_or_else(PoisonError::into_inner));
        for id in ids {
            self.service.unregister_consumer(id);
        }
    }

    pub fn ids(&self) -> Vec<ConsumerId> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ConsumerGroup {
    fn drop(&mut self) {
        self.unregister_all();
    }
}
