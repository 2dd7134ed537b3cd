//! URL-keyed response cache shared by every screen.
//!
//! Each key owns a `watch` channel, so any screen holding a receiver sees
//! invalidations and optimistic writes made by any other code path. Fetches
//! for one key are serialized through a per-key async lock, which is what
//! collapses concurrent reads into a single request.

use crate::error::ApiError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Loads the value stored under a cache key.
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<T, ApiError>;
}

struct Entry<T> {
    tx: watch::Sender<Option<T>>,
    fetch_lock: Arc<tokio::sync::Mutex<()>>,
    // Sequence number of the last fetch started / last fetch that succeeded.
    started: u64,
    completed: u64,
    // Most recent failure, cleared by the next success.
    failed: Option<(u64, Arc<ApiError>)>,
}

impl<T> Entry<T> {
    fn new() -> Entry<T> {
        let (tx, _rx) = watch::channel(None);
        Entry {
            tx,
            fetch_lock: Arc::new(tokio::sync::Mutex::new(())),
            started: 0,
            completed: 0,
            failed: None,
        }
    }
}

struct Inner<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    fetcher: Arc<dyn Fetch<T>>,
}

pub struct Cache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// How `Cache::mutate` treats subscribers around the write.
pub struct MutateOptions<T> {
    /// Published before the write starts.
    pub optimistic_data: Option<T>,
    /// Restore the pre-mutation value if the write fails.
    pub rollback_on_error: bool,
    /// Refetch after a successful write.
    pub revalidate: bool,
}

impl<T> Default for MutateOptions<T> {
    fn default() -> Self {
        MutateOptions {
            optimistic_data: None,
            rollback_on_error: true,
            revalidate: false,
        }
    }
}

impl<T> Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Arc<dyn Fetch<T>>) -> Cache<T> {
        Cache {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                fetcher,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
        // Nothing panics while holding this lock; recover from poison anyway.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_entry<R>(&self, key: &str, f: impl FnOnce(&mut Entry<T>) -> R) -> R {
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_insert_with(Entry::new);
        f(entry)
    }

    pub fn peek(&self, key: &str) -> Option<T> {
        self.with_entry(key, |entry| entry.tx.borrow().clone())
    }

    pub fn subscribe(&self, key: &str) -> watch::Receiver<Option<T>> {
        self.with_entry(key, |entry| entry.tx.subscribe())
    }

    /// Replace the value and notify subscribers.
    pub fn set(&self, key: &str, value: Option<T>) {
        self.with_entry(key, |entry| {
            entry.tx.send_replace(value);
        });
    }

    /// The cached value, fetching it on a miss. Callers arriving while a
    /// fetch is in flight wait for that fetch and share its outcome,
    /// success or failure.
    pub async fn get(&self, key: &str) -> Result<T, ApiError> {
        if let Some(value) = self.peek(key) {
            return Ok(value);
        }
        let (lock, seen) = self.with_entry(key, |e| (Arc::clone(&e.fetch_lock), e.started));
        let _guard = lock.lock().await;
        if let Some(value) = self.peek(key) {
            debug!(key, "reusing value fetched while waiting");
            return Ok(value);
        }
        if let Some(err) = self.failed_since(key, seen) {
            debug!(key, "reusing failure of the fetch waited on");
            return Err(err);
        }
        self.fetch_locked(key).await
    }

    /// Refetch and publish. Only a fetch that started after this call can
    /// satisfy it; on failure the cached value is left alone.
    pub async fn invalidate(&self, key: &str) -> Result<T, ApiError> {
        let (lock, seen) = self.with_entry(key, |e| (Arc::clone(&e.fetch_lock), e.started));
        let _guard = lock.lock().await;
        let fresh = self.with_entry(key, |e| {
            if e.completed > seen {
                e.tx.borrow().clone()
            } else {
                None
            }
        });
        if let Some(value) = fresh {
            debug!(key, "invalidation satisfied by a newer fetch");
            return Ok(value);
        }
        if let Some(err) = self.failed_since(key, seen) {
            debug!(key, "invalidation shares the failure of a newer fetch");
            return Err(err);
        }
        self.fetch_locked(key).await
    }

    // The failure of the latest fetch, if it started after `seen`.
    fn failed_since(&self, key: &str, seen: u64) -> Option<ApiError> {
        self.with_entry(key, |e| match &e.failed {
            Some((seq, err)) if *seq > seen => Some(ApiError::Shared(Arc::clone(err))),
            _ => None,
        })
    }

    // Caller holds the key's fetch lock.
    async fn fetch_locked(&self, key: &str) -> Result<T, ApiError> {
        let seq = self.with_entry(key, |e| {
            e.started += 1;
            e.started
        });
        debug!(key, seq, "fetching");
        match self.inner.fetcher.fetch(key).await {
            Ok(value) => {
                self.with_entry(key, |e| {
                    e.completed = seq;
                    e.failed = None;
                    e.tx.send_replace(Some(value.clone()));
                });
                Ok(value)
            }
            Err(err) => {
                warn!(key, error = %err, "fetch failed, keeping cached value");
                let err = Arc::new(err);
                self.with_entry(key, |e| e.failed = Some((seq, Arc::clone(&err))));
                Err(ApiError::Shared(err))
            }
        }
    }

    /// Snapshot the current value and publish `optimistic` (if any) in its
    /// place. The returned transaction must be committed or rolled back;
    /// dropping it unresolved rolls back.
    pub fn begin(&self, key: &str, optimistic: Option<T>) -> Transaction<T> {
        let snapshot = self.with_entry(key, |entry| {
            let snapshot = entry.tx.borrow().clone();
            if let Some(value) = optimistic {
                entry.tx.send_replace(Some(value));
            }
            snapshot
        });
        Transaction {
            cache: self.clone(),
            key: key.to_string(),
            snapshot,
            resolved: false,
        }
    }

    /// Run `updater` (the real write, yielding the authoritative value)
    /// inside a transaction.
    pub async fn mutate<F>(
        &self,
        key: &str,
        updater: F,
        options: MutateOptions<T>,
    ) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let tx = self.begin(key, options.optimistic_data);
        match updater.await {
            Ok(value) => {
                tx.commit(value.clone());
                if options.revalidate {
                    if let Err(err) = self.invalidate(key).await {
                        warn!(key, error = %err, "revalidation after mutate failed");
                    }
                }
                Ok(value)
            }
            Err(err) => {
                if options.rollback_on_error {
                    debug!(key, "write failed, rolling back");
                    tx.rollback();
                } else {
                    tx.keep();
                }
                Err(err)
            }
        }
    }
}

/// An optimistic write in progress.
pub struct Transaction<T>
where
    T: Clone + Send + Sync + 'static,
{
    cache: Cache<T>,
    key: String,
    snapshot: Option<T>,
    resolved: bool,
}

impl<T> Transaction<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn commit(mut self, value: T) {
        self.resolved = true;
        self.cache.set(&self.key, Some(value));
    }

    pub fn rollback(mut self) {
        self.restore();
    }

    /// Leave whatever is published now in place.
    pub fn keep(mut self) {
        self.resolved = true;
    }

    fn restore(&mut self) {
        self.resolved = true;
        self.cache.set(&self.key, self.snapshot.take());
    }
}

impl<T> Drop for Transaction<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.resolved {
            self.restore();
        }
    }
}
