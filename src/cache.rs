//! Best-effort "lemma exists" cache in front of the posting store.
//!
//! A hit only hints that the lemma row exists; the indexer always confirms
//! with the store before updating. Errors are logged and reported as misses.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::warn;

use crate::models::SiteId;

#[async_trait]
pub trait ExistenceCache: Send + Sync {
    /// `None` when the cache cannot answer
    async fn exists(&self, site_id: SiteId, lemma: &str) -> Option<bool>;

    async fn set(&self, site_id: SiteId, lemma: &str);

    /// Drop the marker of a lemma that no longer exists
    async fn remove(&self, site_id: SiteId, lemma: &str);
}

/// Cache that never answers
pub struct NoopCache;

#[async_trait]
impl ExistenceCache for NoopCache {
    async fn exists(&self, _site_id: SiteId, _lemma: &str) -> Option<bool> {
        None
    }

    async fn set(&self, _site_id: SiteId, _lemma: &str) {}

    async fn remove(&self, _site_id: SiteId, _lemma: &str) {}
}

/// Redis-backed existence markers, one key per (site, lemma)
#[derive(Clone)]
pub struct RedisExistenceCache {
    client: ConnectionManager,
    key_prefix: String,
}

impl RedisExistenceCache {
    /// Connect to Redis (e.g. "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str, key_prefix: &str) -> Result<Self, RedisError> {
        let client = Client::open(redis_url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        Ok(Self {
            client: connection_manager,
            key_prefix: key_prefix.to_string(),
        })
    }

    pub fn key(&self, site_id: SiteId, lemma: &str) -> String {
        cache_key(&self.key_prefix, site_id, lemma)
    }
}

pub fn cache_key(prefix: &str, site_id: SiteId, lemma: &str) -> String {
    format!("{}::{}::{}", prefix, site_id, lemma)
}

#[async_trait]
impl ExistenceCache for RedisExistenceCache {
    async fn exists(&self, site_id: SiteId, lemma: &str) -> Option<bool> {
        let key = self.key(site_id, lemma);
        // ConnectionManager is a cheap handle over one multiplexed connection
        let mut conn = self.client.clone();
        match conn.exists::<_, bool>(&key).await {
            Ok(found) => Some(found),
            Err(e) => {
                warn!("Lemma cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, site_id: SiteId, lemma: &str) {
        let key = self.key(site_id, lemma);
        let mut conn = self.client.clone();
        if let Err(e) = conn.set::<_, _, ()>(&key, 1u8).await {
            warn!("Lemma cache write failed for {}: {}", key, e);
        }
    }

    async fn remove(&self, site_id: SiteId, lemma: &str) {
        let key = self.key(site_id, lemma);
        let mut conn = self.client.clone();
        if let Err(e) = conn.del::<_, ()>(&key).await {
            warn!("Lemma cache delete failed for {}: {}", key, e);
        }
    }
}
