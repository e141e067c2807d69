//! Timeout and bounded-retry wrapper for external model calls.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use docsearch_core::config::CallSettings;
use docsearch_core::{Dependency, Error, Result};

const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub dependency: Dependency,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_settings(dependency: Dependency, settings: &CallSettings) -> Self {
        let max_retries = match dependency {
            Dependency::Generation => 0,
            _ => settings.max_retries,
        };
        Self {
            dependency,
            timeout: settings.timeout(),
            max_retries,
            backoff: settings.backoff(),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.pow(attempt.min(MAX_BACKOFF_SHIFT)))
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            dependency: self.dependency,
            millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn pause(&self, attempt: u32, err: &Error) {
        let delay = self.backoff_for(attempt);
        warn!(
            dependency = %self.dependency,
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retrying external call"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Run a blocking model call on the blocking pool, bounded by the policy's
/// timeout and retried with exponential backoff.
///
/// A timed-out blocking task cannot be cancelled and keeps its thread until
/// the model returns, so timeouts are not retried here; only failures that
/// came back from the model are.
pub async fn call_blocking<T, F>(policy: &CallPolicy, f: F) -> Result<T>
where
    T: Send + 'static,
    F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let mut attempt = 0;
    loop {
        let task = {
            let f = Arc::clone(&f);
            tokio::task::spawn_blocking(move || (*f)())
        };
        let err = match tokio::time::timeout(policy.timeout, task).await {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(e))) => policy.dependency.error(format!("{e:#}")),
            Ok(Err(join)) => policy.dependency.error(format!("worker failed: {join}")),
            Err(_) => return Err(policy.timeout_error()),
        };
        if attempt >= policy.max_retries {
            return Err(err);
        }
        policy.pause(attempt, &err).await;
        attempt += 1;
    }
}

/// Async counterpart of [`call_blocking`] for network-backed dependencies.
pub async fn call_async<T, F, Fut>(policy: &CallPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => policy.dependency.error(format!("{e:#}")),
            Err(_) => policy.timeout_error(),
        };
        if attempt >= policy.max_retries {
            return Err(err);
        }
        policy.pause(attempt, &err).await;
        attempt += 1;
    }
}
