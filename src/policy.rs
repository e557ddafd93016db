//! Invoke-with-policy wrapper shared by every pipeline stage.
//!
//! A [`TaskRunner`] executes a call under an [`InvocationPolicy`]: it looks
//! the call up in a result cache keyed by a [`Fingerprint`] of its inputs,
//! bounds the number of calls in flight, and re-attempts transient failures.

use crate::error::{RepoStatsError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 8;

/// Delay between attempts of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelay {
    Fixed(Duration),
    /// Doubles after every attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl RetryDelay {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            RetryDelay::Fixed(delay) => delay,
            RetryDelay::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Caching and retry settings for one kind of call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationPolicy {
    /// How long a successful result stays cached. `None` disables caching.
    pub cache_ttl: Option<Duration>,
    /// Additional attempts after the first failure.
    pub retries: u32,
    pub retry_delay: RetryDelay,
}

impl InvocationPolicy {
    /// Single attempt, nothing cached.
    pub fn none() -> Self {
        Self {
            cache_ttl: None,
            retries: 0,
            retry_delay: RetryDelay::Fixed(Duration::ZERO),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl.filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn with_retries(mut self, retries: u32, retry_delay: RetryDelay) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self {
            cache_ttl: Some(Duration::from_secs(3600)),
            retries: 3,
            retry_delay: RetryDelay::Fixed(Duration::from_secs(2)),
        }
    }
}

/// Deterministic cache key derived from a task name and its inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of<I: Serialize + ?Sized>(task: &str, inputs: &I) -> Result<Self> {
        let encoded = serde_json::to_vec(inputs)?;

        let mut hasher = Sha256::new();
        hasher.update(task.as_bytes());
        hasher.update([0u8]);
        hasher.update(&encoded);

        Ok(Fingerprint(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Counters describing how a runner has been used
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Executes calls under an [`InvocationPolicy`].
///
/// Cloning is cheap; clones share the cache and the concurrency limit.
#[derive(Clone)]
pub struct TaskRunner {
    cache: Arc<RwLock<HashMap<Fingerprint, CacheEntry>>>,
    counters: Arc<RwLock<RunnerStats>>,
    concurrency: Arc<Semaphore>,
}

impl TaskRunner {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(RunnerStats::default())),
            concurrency: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    /// Run `call`, serving it from cache when a fresh entry exists for the
    /// same task and inputs.
    pub async fn invoke<I, T, F, Fut>(
        &self,
        task: &str,
        inputs: &I,
        policy: &InvocationPolicy,
        call: F,
    ) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let fingerprint = match policy.cache_ttl {
            Some(_) => Some(Fingerprint::of(task, inputs)?),
            None => None,
        };

        if let Some(fingerprint) = &fingerprint {
            if let Some(value) = self.cached(fingerprint).await {
                match serde_json::from_value::<T>(value) {
                    Ok(hit) => {
                        debug!(task, %fingerprint, "Cache hit");
                        self.counters.write().await.cache_hits += 1;
                        return Ok(hit);
                    }
                    Err(e) => {
                        warn!(task, %fingerprint, "Discarding unreadable cache entry: {}", e);
                        self.cache.write().await.remove(fingerprint);
                    }
                }
            }
            self.counters.write().await.cache_misses += 1;
        }

        let result = self.invoke_with_retry(task, policy, &call).await?;

        if let (Some(fingerprint), Some(ttl)) = (fingerprint, policy.cache_ttl) {
            let now = Instant::now();
            let entry = CacheEntry {
                value: serde_json::to_value(&result)?,
                expires_at: now + ttl,
            };
            let mut cache = self.cache.write().await;
            cache.retain(|_, entry| entry.expires_at > now);
            cache.insert(fingerprint, entry);
        }

        Ok(result)
    }

    async fn invoke_with_retry<T, F, Fut>(&self, task: &str, policy: &InvocationPolicy, call: &F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            let outcome = {
                let _permit = self
                    .concurrency
                    .acquire()
                    .await
                    .map_err(|e| RepoStatsError::Internal(format!("Concurrency limiter closed: {}", e)))?;
                call().await
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.retry_delay.delay_for(attempt);
                    warn!(
                        task,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Call failed, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(task, attempts = attempt, "Retry budget exhausted: {}", e);
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn cached(&self, fingerprint: &Fingerprint) -> Option<serde_json::Value> {
        let now = Instant::now();
        {
            let cache = self.cache.read().await;
            match cache.get(fingerprint) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        self.cache.write().await.remove(fingerprint);
        None
    }

    /// Drop every cached result.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    /// Counters plus the number of live cache entries. Expired entries are
    /// evicted here.
    pub async fn stats(&self) -> RunnerStats {
        let mut stats = self.counters.read().await.clone();
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| entry.expires_at > now);
        stats.cache_entries = cache.len();
        stats
    }

    pub fn available_permits(&self) -> usize {
        self.concurrency.available_permits()
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY_LIMIT)
    }
}
