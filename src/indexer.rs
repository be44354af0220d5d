//! Merges per-page lemma counts into the shared lemma/index tables.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::cache::ExistenceCache;
use crate::config::Config;
use crate::models::{LemmaFrequencies, Page, PageId, SiteId};
use crate::morphology::Morphology;
use crate::store::{self, PageRemoval, PostingStore, StoreError};

/// Striped mutexes keyed by (site, lemma text).
///
/// Two merges touching the same key serialize; unrelated keys rarely share a
/// stripe. Guards are taken on the blocking pool, never across an `.await`.
pub struct LemmaLocks {
    shards: Vec<Mutex<()>>,
}

impl LemmaLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn shard_of(&self, site_id: SiteId, lemma: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        site_id.hash(&mut hasher);
        lemma.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Lock every stripe the lemmas fall on, in ascending stripe order so
    /// two callers never wait on each other crosswise
    pub fn lock_all<'a, I>(&self, site_id: SiteId, lemmas: I) -> Vec<MutexGuard<'_, ()>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut shards: Vec<usize> = lemmas
            .into_iter()
            .map(|lemma| self.shard_of(site_id, lemma))
            .collect();
        shards.sort_unstable();
        shards.dedup();
        shards.into_iter().map(|i| self.shards[i].lock()).collect()
    }
}

impl Default for LemmaLocks {
    fn default() -> Self {
        Self::new(Config::LEMMA_LOCK_SHARDS)
    }
}

/// Outcome of merging one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Index rows written
    pub indexed: usize,
    /// Lemma rows created by this page
    pub created: usize,
}

pub struct Indexer {
    store: Arc<dyn PostingStore>,
    cache: Arc<dyn ExistenceCache>,
    morphology: Arc<Morphology>,
    locks: Arc<LemmaLocks>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn PostingStore>,
        cache: Arc<dyn ExistenceCache>,
        morphology: Arc<Morphology>,
    ) -> Self {
        Self {
            store,
            cache,
            morphology,
            locks: Arc::new(LemmaLocks::default()),
        }
    }

    pub fn morphology(&self) -> &Morphology {
        &self.morphology
    }

    /// Lemmatize a saved page and merge its counts
    pub async fn index_page(&self, page: &Page) -> Result<MergeStats, StoreError> {
        let lemmas = self.morphology.lemmatize(&page.content);
        self.merge_page(page.site_id, page.id, &lemmas).await
    }

    /// Merge one page's lemma counts.
    ///
    /// Each lemma's frequency grows by one and one index row with the local
    /// count is written, all in one store call made under the stripes of the
    /// page's lemmas. Cache lookups finish before anything is written, so a
    /// merge cancelled at an `.await` leaves no partial rows behind.
    pub async fn merge_page(
        &self,
        site_id: SiteId,
        page_id: PageId,
        lemmas: &LemmaFrequencies,
    ) -> Result<MergeStats, StoreError> {
        if lemmas.is_empty() {
            return Ok(MergeStats::default());
        }
        let mut ordered: Vec<(String, u32)> =
            lemmas.iter().map(|(text, count)| (text.clone(), *count)).collect();
        ordered.sort();

        let mut to_cache = Vec::new();
        let mut cached = Vec::new();
        for (text, _) in &ordered {
            match self.cache.exists(site_id, text).await {
                Some(true) => cached.push(text.clone()),
                _ => to_cache.push(text.clone()),
            }
        }

        let locks = Arc::clone(&self.locks);
        let merge = store::blocking(&self.store, move |store| {
            let _guards = locks.lock_all(site_id, ordered.iter().map(|(text, _)| text.as_str()));
            store.merge_page(site_id, page_id, &ordered)
        })
        .await?;

        for text in &merge.created {
            if cached.contains(text) {
                trace!("Stale cache entry for lemma '{}' of site {}", text, site_id);
                to_cache.push(text.clone());
            }
        }
        for text in &to_cache {
            self.cache.set(site_id, text).await;
        }

        let stats = MergeStats {
            indexed: merge.rows.len(),
            created: merge.created.len(),
        };
        debug!(
            "Merged page {} of site {}: {} lemmas, {} new",
            page_id, site_id, stats.indexed, stats.created
        );
        Ok(stats)
    }

    /// Delete a page with its index rows and take its contribution back out
    /// of the lemma frequencies. Lemmas left on no page are removed.
    pub async fn remove_page(&self, site_id: SiteId, page_id: PageId) -> Result<usize, StoreError> {
        let locks = Arc::clone(&self.locks);
        let removal = store::blocking(&self.store, move |store| -> Result<PageRemoval, StoreError> {
            let mut texts = Vec::new();
            for entry in store.indexes_for_page(page_id)? {
                if let Some(lemma) = store.find_lemma_by_id(entry.lemma_id)? {
                    texts.push(lemma.text);
                }
            }
            let _guards = locks.lock_all(site_id, texts.iter().map(String::as_str));
            store.remove_page(page_id)
        })
        .await?;

        for text in &removal.dropped {
            self.cache.remove(site_id, text).await;
        }

        debug!(
            "Removed page {} of site {}: {} index rows, {} lemmas dropped",
            page_id,
            site_id,
            removal.rows.len(),
            removal.dropped.len()
        );
        Ok(removal.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;
    use crate::models::{NewPage, SiteStatus};
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Indexer, SiteId) {
        let store = Arc::new(MemoryStore::new());
        let site = store
            .insert_site("https://example.test", "Example", SiteStatus::Indexing)
            .unwrap();
        let indexer = Indexer::new(
            store.clone(),
            Arc::new(NoopCache),
            Arc::new(Morphology::default()),
        );
        (store, indexer, site.id)
    }

    fn add_page(store: &MemoryStore, site_id: SiteId, path: &str) -> PageId {
        store
            .insert_page(NewPage {
                site_id,
                path: path.to_string(),
                code: 200,
                content: String::new(),
                title: None,
            })
            .unwrap()
            .unwrap()
            .id
    }

    fn counts(pairs: &[(&str, u32)]) -> LemmaFrequencies {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Answers at once except for one lemma, whose lookup never completes
    struct StallingCache {
        stall_on: &'static str,
    }

    #[async_trait::async_trait]
    impl ExistenceCache for StallingCache {
        async fn exists(&self, _site_id: SiteId, lemma: &str) -> Option<bool> {
            if lemma == self.stall_on {
                std::future::pending::<()>().await;
            }
            None
        }

        async fn set(&self, _site_id: SiteId, _lemma: &str) {}

        async fn remove(&self, _site_id: SiteId, _lemma: &str) {}
    }

    #[test]
    fn test_lock_shards_are_stable() {
        let locks = LemmaLocks::new(16);
        assert_eq!(locks.shard_of(1, "кот"), locks.shard_of(1, "кот"));
        assert!(locks.shard_of(1, "кот") < 16);
        assert_eq!(LemmaLocks::new(0).shard_of(5, "x"), 0);
    }

    #[test]
    fn test_lock_all_takes_each_stripe_once() {
        let locks = LemmaLocks::new(1);
        // every lemma lands on the single stripe; locking it twice would deadlock
        let guards = locks.lock_all(1, ["кот", "собака", "дом"]);
        assert_eq!(guards.len(), 1);
        drop(guards);
        assert_eq!(locks.lock_all(1, std::iter::empty::<&str>()).len(), 0);
    }

    #[tokio::test]
    async fn test_merge_creates_and_increments() {
        let (store, indexer, site_id) = setup();
        let a = add_page(&store, site_id, "/a");
        let b = add_page(&store, site_id, "/b");

        let stats = indexer
            .merge_page(site_id, a, &counts(&[("кот", 2), ("собака", 1)]))
            .await
            .unwrap();
        assert_eq!(stats, MergeStats { indexed: 2, created: 2 });

        let stats = indexer
            .merge_page(site_id, b, &counts(&[("кот", 1)]))
            .await
            .unwrap();
        assert_eq!(stats, MergeStats { indexed: 1, created: 0 });

        let cat = store.find_lemma(site_id, "кот").unwrap().unwrap();
        assert_eq!(cat.frequency, 2);
        let dog = store.find_lemma(site_id, "собака").unwrap().unwrap();
        assert_eq!(dog.frequency, 1);

        let mut ranks: Vec<(PageId, u32)> = store
            .postings(cat.id)
            .unwrap()
            .iter()
            .map(|e| (e.page_id, e.rank))
            .collect();
        ranks.sort();
        assert_eq!(ranks, vec![(a, 2), (b, 1)]);
    }

    #[tokio::test]
    async fn test_empty_page_writes_nothing() {
        let (store, indexer, site_id) = setup();
        let a = add_page(&store, site_id, "/a");
        let stats = indexer
            .merge_page(site_id, a, &LemmaFrequencies::new())
            .await
            .unwrap();
        assert_eq!(stats, MergeStats::default());
        assert_eq!(store.count_lemmas(Some(site_id)).unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_of_same_lemma() {
        let (store, indexer, site_id) = setup();
        let indexer = Arc::new(indexer);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let page_id = add_page(&store, site_id, &format!("/p{}", i));
            let indexer = indexer.clone();
            tasks.spawn(async move {
                indexer
                    .merge_page(site_id, page_id, &counts(&[("кот", 1), ("дом", 3)]))
                    .await
                    .unwrap()
            });
        }
        let mut created = 0;
        while let Some(stats) = tasks.join_next().await {
            created += stats.unwrap().created;
        }

        assert_eq!(created, 2);
        assert_eq!(store.count_lemmas(Some(site_id)).unwrap(), 2);
        let cat = store.find_lemma(site_id, "кот").unwrap().unwrap();
        assert_eq!(cat.frequency, 32);
        assert_eq!(store.postings(cat.id).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_cancelled_merge_leaves_no_partial_rows() {
        let (store, _indexer, site_id) = setup();
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            Arc::new(StallingCache { stall_on: "собака" }),
            Arc::new(Morphology::default()),
        ));
        let a = add_page(&store, site_id, "/a");

        // "кот" sorts first and is looked up before the stalled lemma
        let task = {
            let indexer = indexer.clone();
            tokio::spawn(async move {
                indexer
                    .merge_page(site_id, a, &counts(&[("кот", 2), ("собака", 1)]))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(store.find_lemma(site_id, "кот").unwrap().is_none());
        assert!(store.find_lemma(site_id, "собака").unwrap().is_none());
        assert!(store.indexes_for_page(a).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_over_durable_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn PostingStore> =
            Arc::new(crate::store::RedbStore::open(dir.path()).unwrap());
        let site = store
            .insert_site("https://example.test", "Example", SiteStatus::Indexing)
            .unwrap();
        let indexer = Indexer::new(store.clone(), Arc::new(NoopCache), Arc::new(Morphology::default()));

        let mut pages = Vec::new();
        for path in ["/a", "/b"] {
            let page = store
                .insert_page(NewPage {
                    site_id: site.id,
                    path: path.to_string(),
                    code: 200,
                    content: "кот и собака".to_string(),
                    title: None,
                })
                .unwrap()
                .unwrap();
            assert_eq!(indexer.index_page(&page).await.unwrap().indexed, 2);
            pages.push(page.id);
        }
        assert_eq!(store.find_lemma(site.id, "собака").unwrap().unwrap().frequency, 2);

        assert_eq!(indexer.remove_page(site.id, pages[0]).await.unwrap(), 2);
        let dog = store.find_lemma(site.id, "собака").unwrap().unwrap();
        assert_eq!(dog.frequency, 1);
        assert_eq!(store.postings(dog.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_page_rolls_back_frequencies() {
        let (store, indexer, site_id) = setup();
        let a = add_page(&store, site_id, "/a");
        let b = add_page(&store, site_id, "/b");
        indexer
            .merge_page(site_id, a, &counts(&[("кот", 2), ("собака", 1)]))
            .await
            .unwrap();
        indexer
            .merge_page(site_id, b, &counts(&[("кот", 1)]))
            .await
            .unwrap();

        assert_eq!(indexer.remove_page(site_id, a).await.unwrap(), 2);

        assert!(store.find_page(a).unwrap().is_none());
        assert_eq!(store.find_lemma(site_id, "кот").unwrap().unwrap().frequency, 1);
        assert!(store.find_lemma(site_id, "собака").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_page_uses_morphology() {
        let (store, indexer, site_id) = setup();
        let page = store
            .insert_page(NewPage {
                site_id,
                path: "/".to_string(),
                code: 200,
                content: "кот и кот".to_string(),
                title: None,
            })
            .unwrap()
            .unwrap();

        let stats = indexer.index_page(&page).await.unwrap();
        assert_eq!(stats.indexed, 1);
        let cat = store.find_lemma(site_id, "кот").unwrap().unwrap();
        assert_eq!(store.postings(cat.id).unwrap()[0].rank, 2);
    }
}
