//! Short-lived response cache with request coalescing
//!
//! Entries expire lazily: an expired entry is dropped by the next read that
//! finds it. The map never grows past its capacity; when full, expired
//! entries are swept and, if that frees nothing, the new value is simply
//! not cached.
//!
//! On a miss, concurrent callers for the same key share one computation. The
//! computation runs on its own task under its own timeout, so a caller that
//! goes away does not cancel the work for everyone else. Successful results
//! are stored, errors are not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::aggregate::Period;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

pub const DEFAULT_CAPACITY: usize = 100;

pub const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("computation failed: {0}")]
    Compute(Arc<anyhow::Error>),

    #[error("computation timed out after {0:?}")]
    Timeout(Duration),

    #[error("computation aborted")]
    Aborted,
}

/// Canonical cache key of a status query.
pub fn cache_key(period: Period, provider: &str, service: &str) -> String {
    format!(
        "p={}|prov={}|svc={}",
        period.as_str(),
        provider.trim().to_lowercase(),
        service.trim()
    )
}

struct Entry {
    data: Vec<u8>,
    expires_at: Instant,
}

type SharedLoad = Shared<BoxFuture<'static, Result<Vec<u8>, CacheError>>>;

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    inflight: Mutex<HashMap<String, SharedLoad>>,
    ttl: Duration,
    capacity: usize,
    compute_timeout: Duration,
}

#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY, DEFAULT_COMPUTE_TIMEOUT)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize, compute_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                ttl,
                capacity,
                compute_timeout,
            }),
        }
    }

    /// Copy of the cached payload, if present and fresh.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    /// Store a copy of `data`. Returns whether it was actually cached.
    pub fn set(&self, key: &str, data: &[u8]) -> bool {
        self.inner.set(key, data)
    }

    pub fn len(&self) -> usize {
        read(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached payload for `key`, or compute it with `loader`.
    ///
    /// Concurrent callers with the same key share a single `loader` run and
    /// all receive its result or error.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
    {
        if let Some(hit) = self.inner.get(key) {
            trace!("cache hit: {}", key);
            return Ok(hit);
        }

        let shared = {
            let mut inflight = lock(&self.inner.inflight);
            match inflight.get(key) {
                Some(pending) => {
                    trace!("joining in-flight computation: {}", key);
                    pending.clone()
                }
                None => {
                    // a computation may have finished between the first lookup and here
                    if let Some(hit) = self.inner.get(key) {
                        return Ok(hit);
                    }
                    debug!("cache miss, computing: {}", key);
                    let pending = self.spawn_load(key.to_string(), loader());
                    inflight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };

        shared.await
    }

    fn spawn_load<Fut>(&self, key: String, load: Fut) -> SharedLoad
    where
        Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(inner.compute_timeout, load).await {
                Ok(Ok(data)) => {
                    inner.set(&key, &data);
                    Ok(data)
                }
                Ok(Err(e)) => {
                    warn!("computation for {} failed: {:#}", key, e);
                    Err(CacheError::Compute(Arc::new(e)))
                }
                Err(_) => {
                    warn!("computation for {} timed out", key);
                    Err(CacheError::Timeout(inner.compute_timeout))
                }
            };
            lock(&inner.inflight).remove(&key);
            result
        });

        async move { task.await.unwrap_or(Err(CacheError::Aborted)) }
            .boxed()
            .shared()
    }
}

impl Inner {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = read(&self.entries);
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.data.clone()),
                Some(_) => {}
            }
        }

        let mut entries = write(&self.entries);
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, data: &[u8]) -> bool {
        let now = Instant::now();
        let mut entries = write(&self.entries);

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.capacity {
                debug!("cache full ({} entries), not caching {}", entries.len(), key);
                return false;
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                data: data.to_vec(),
                expires_at: now + self.ttl,
            },
        );
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
