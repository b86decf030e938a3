//! Cache storage.
//!
//! # Responsibilities
//! - Get/set/remove cached response bodies by [`CacheKey`]
//! - Expire entries after their TTL
//!
//! # Design Decisions
//! - `MemoryStore` expires lazily on `get` and periodically via a janitor
//!   task, so untouched keys do not pile up
//! - Uses `tokio::time::Instant` so TTLs follow the (pausable) runtime clock

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::CacheKey;

/// A cached response body.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(key: CacheKey, body: Bytes, content_type: Option<String>, ttl: Duration) -> Self {
        Self {
            key,
            body,
            content_type,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry rejected: {0}")]
    Rejected(String),
}

/// Key-value store behind the cache decorator. Writes are plain upserts.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// A live entry for `key`; expired entries are never returned.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    async fn set(&self, entry: CacheEntry) -> Result<(), StoreError>;

    async fn remove(&self, key: &CacheKey) -> Result<(), StoreError>;
}

/// In-process store on a concurrent hash map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries every `interval` until shutdown.
    pub fn spawn_janitor(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, remaining = store.len(), "Expired cache entries purged");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Cache janitor stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(live)
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KeySelector;
    use axum::http::Method;

    fn key(path: &str) -> CacheKey {
        KeySelector::default().select(&Method::GET, &path.parse().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(300);
        store
            .set(CacheEntry::new(key("/a"), Bytes::from("body"), None, ttl))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        let entry = store.get(&key("/a")).await.unwrap().unwrap();
        assert_eq!(entry.body, Bytes::from("body"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(&key("/a")).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_is_an_upsert() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store
            .set(CacheEntry::new(key("/a"), Bytes::from("old"), None, ttl))
            .await
            .unwrap();
        store
            .set(CacheEntry::new(
                key("/a"),
                Bytes::from("new"),
                Some("text/html".into()),
                ttl,
            ))
            .await
            .unwrap();

        let entry = store.get(&key("/a")).await.unwrap().unwrap();
        assert_eq!(entry.body, Bytes::from("new"));
        assert_eq!(entry.content_type.as_deref(), Some("text/html"));
        assert_eq!(store.len(), 1);

        store.remove(&key("/a")).await.unwrap();
        assert!(store.get(&key("/a")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_purges_untouched_entries() {
        let store = MemoryStore::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let janitor = store.spawn_janitor(Duration::from_secs(600), shutdown_rx);

        store
            .set(CacheEntry::new(key("/a"), Bytes::from("x"), None, Duration::from_secs(300)))
            .await
            .unwrap();
        store
            .set(CacheEntry::new(key("/b"), Bytes::from("y"), None, Duration::from_secs(900)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(store.len(), 1);

        shutdown_tx.send(()).unwrap();
        janitor.await.unwrap();
    }
}
