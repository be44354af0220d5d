//! Wires the configured store, cache, morphology and fetcher into a controller.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{ExistenceCache, NoopCache, RedisExistenceCache};
use crate::config::{AppConfig, StorageBackend};
use crate::morphology::{Morphology, MorphologyError};
use crate::network::{FetchError, Fetcher, HttpClient};
use crate::run_controller::RunController;
use crate::store::{MemoryStore, PostingStore, RedbStore, StoreError};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to open the index store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to load morphology dictionaries: {0}")]
    Morphology(#[from] MorphologyError),

    #[error("Failed to create the HTTP client: {0}")]
    Http(#[from] FetchError),
}

/// Open the configured store backend
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn PostingStore>, StoreError> {
    let store: Arc<dyn PostingStore> = match config.storage.backend {
        StorageBackend::Redb => Arc::new(RedbStore::open(&config.storage.data_dir)?),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Redis when configured and reachable, otherwise no cache at all
pub async fn connect_cache(config: &AppConfig) -> Arc<dyn ExistenceCache> {
    let url = match &config.cache.redis_url {
        Some(url) => url,
        None => return Arc::new(NoopCache),
    };
    match RedisExistenceCache::new(url, &config.cache.key_prefix).await {
        Ok(cache) => {
            info!("Lemma existence cache connected at {}", url);
            Arc::new(cache)
        }
        Err(e) => {
            warn!("Redis cache at {} unavailable, continuing without it: {}", url, e);
            Arc::new(NoopCache)
        }
    }
}

/// Build a controller over the real HTTP fetcher
#[tracing::instrument(skip(config), fields(sites = config.sites.len()))]
pub async fn build_engine(config: &AppConfig) -> Result<Arc<RunController>, BuildError> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpClient::new(&config.crawler)?);
    build_engine_with_fetcher(config, fetcher).await
}

/// Build a controller over any fetcher
pub async fn build_engine_with_fetcher(
    config: &AppConfig,
    fetcher: Arc<dyn Fetcher>,
) -> Result<Arc<RunController>, BuildError> {
    let store = open_store(config)?;
    let cache = connect_cache(config).await;
    let morphology = Arc::new(Morphology::with_dictionaries(
        config.morphology.russian_dictionary.as_deref(),
        config.morphology.english_dictionary.as_deref(),
    )?);

    Ok(Arc::new(RunController::new(
        config, store, fetcher, cache, morphology,
    )))
}
