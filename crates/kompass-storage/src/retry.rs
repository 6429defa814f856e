//! Bounded exponential-backoff retry around backend calls.
//!
//! Only [`BackendError::Unavailable`] is retried; every other failure is
//! returned on the first attempt. Health probes are never retried.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use kompass_types::{BackendConfig, Category, RecordMeta, Scope};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::backend::BackendAdapter;
use crate::error::BackendError;

/// How transient failures are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up on the first failure.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `call`, retrying transient failures.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut backoff = self.backoff();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match call().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "Backend call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempts > self.max_retries => {
                    error!(operation, attempts, error = %e, "Max retries exceeded");
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(self.max_interval);
                    warn!(
                        operation,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Adapter decorator applying a [`RetryPolicy`] to every data operation.
pub struct RetryingBackend {
    inner: Arc<dyn BackendAdapter>,
    policy: RetryPolicy,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn BackendAdapter>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &Arc<dyn BackendAdapter> {
        &self.inner
    }
}

#[async_trait]
impl BackendAdapter for RetryingBackend {
    fn config(&self) -> &BackendConfig {
        self.inner.config()
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.inner.health_check().await
    }

    async fn put(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        let inner = self.inner.as_ref();
        self.policy
            .retry("put", move || inner.put(scope, category, key, bytes))
            .await
    }

    async fn get(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let inner = self.inner.as_ref();
        self.policy
            .retry("get", move || inner.get(scope, category, key))
            .await
    }

    async fn list(
        &self,
        scope: &Scope,
        category: Category,
    ) -> Result<Vec<RecordMeta>, BackendError> {
        let inner = self.inner.as_ref();
        self.policy
            .retry("list", move || inner.list(scope, category))
            .await
    }

    async fn delete(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<(), BackendError> {
        let inner = self.inner.as_ref();
        self.policy
            .retry("delete", move || inner.delete(scope, category, key))
            .await
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, BackendError> {
        let inner = self.inner.as_ref();
        self.policy
            .retry("list_scopes", move || inner.list_scopes())
            .await
    }

    async fn usage(&self, scope: &Scope) -> Result<u64, BackendError> {
        let inner = self.inner.as_ref();
        self.policy.retry("usage", move || inner.usage(scope)).await
    }

    async fn usage_total(&self) -> Result<u64, BackendError> {
        let inner = self.inner.as_ref();
        self.policy
            .retry("usage_total", move || inner.usage_total())
            .await
    }
}
