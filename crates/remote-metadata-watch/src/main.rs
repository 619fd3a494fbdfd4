// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use remote_metadata::{
    ConsumerGroup, CountingTelemetry, MetadataServiceConfig, MetadataUpdate,
    RemoteMetadataService, TaskScheduler,
};

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Splits a comma separated URL list, dropping blanks and duplicates.
fn parse_urls(raw: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for url in raw.split(',').map(str::trim).filter(|url| !url.is_empty()) {
        if !urls.iter().any(|known| known == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

fn parse_refresh_interval(raw: Option<String>) -> Duration {
    match raw.map(|value| value.trim().parse::<u64>()) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            warn!("invalid METADATA_REFRESH_INTERVAL_SECS, using the default");
            DEFAULT_REFRESH_INTERVAL
        }
        None => DEFAULT_REFRESH_INTERVAL,
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("METADATA_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let urls = parse_urls(&env::var("METADATA_URLS").unwrap_or_default());
    if urls.is_empty() {
        error!("METADATA_URLS is not set. Nothing to watch, shutting down.");
        return;
    }
    let refresh_interval = parse_refresh_interval(env::var("METADATA_REFRESH_INTERVAL_SECS").ok());
    let truststore = env::var("METADATA_TRUSTSTORE").ok();

    let config = match MetadataServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid metadata configuration: {e}");
            return;
        }
    };
    let scheduler = match TaskScheduler::current() {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Unable to start scheduler: {e}");
            return;
        }
    };
    let telemetry = CountingTelemetry::default();
    let service = match RemoteMetadataService::with_telemetry_sink(
        &config,
        scheduler,
        Arc::new(telemetry.clone()),
    ) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Unable to start metadata service: {e}");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<MetadataUpdate>();
    let consumers = ConsumerGroup::new(service.clone());
    let mut watched = Vec::with_capacity(urls.len());
    for url in &urls {
        let id = consumers
            .register(url, refresh_interval, truststore.clone(), Arc::new(tx.clone()))
            .await;
        info!(%url, consumer_id = %id, ?refresh_interval, "watching metadata source");
        watched.push((id, url.clone()));
    }
    drop(tx);

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(MetadataUpdate { consumer_id, document }) = update else {
                    break;
                };
                let url = watched
                    .iter()
                    .find(|(id, _)| *id == consumer_id)
                    .map_or("unknown", |(_, url)| url.as_str());
                match serde_json::to_string(&*document) {
                    Ok(summary) => info!(%url, %summary, "metadata updated"),
                    Err(e) => warn!(%url, "unable to summarise metadata: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    consumers.unregister_all();
    info!("Metadata watch stopped ({})", telemetry.snapshot());
}
