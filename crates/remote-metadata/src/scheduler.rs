// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background task scheduling on a tokio runtime.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ConfigError;

/// Submits one-off and fixed-delay tasks to a tokio runtime.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    runtime: Handle,
}

impl TaskScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler bound to the runtime the caller is running on.
    pub fn current() -> Result<Self, ConfigError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ConfigError::NoRuntime)
    }

    /// Runs `task` once in the background.
    pub fn submit<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task)
    }

    /// Runs `task` after `initial_delay`, then again `delay` after each run completes.
    ///
    /// Runs never overlap. Cancelling the returned handle stops further runs
    /// but lets a run already in progress finish.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        initial_delay: Duration,
        delay: Duration,
        mut task: F,
    ) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = self.runtime.spawn(async move {
            let mut wait = initial_delay;
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = sleep(wait) => {}
                }
                task().await;
                wait = delay;
            }
            debug!("scheduled task stopped");
        });
        ScheduledTask {
            token,
            handle: Some(handle),
        }
    }
}

/// Handle of a fixed-delay task; dropping it cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the task and waits until its loop has exited.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
