use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{PageMerge, PageRemoval, PostingStore, StoreError};
use crate::models::{
    unix_now, IndexEntry, IndexId, Lemma, LemmaId, NewPage, Page, PageId, Site, SiteId,
    SiteStatus,
};

/// Process-local store on concurrent maps; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicU64,
    sites: DashMap<SiteId, Site>,
    site_urls: DashMap<String, SiteId>,
    pages: DashMap<PageId, Page>,
    page_paths: DashMap<(SiteId, String), PageId>,
    lemmas: DashMap<LemmaId, Lemma>,
    lemma_keys: DashMap<(SiteId, String), LemmaId>,
    indexes: DashMap<IndexId, IndexEntry>,
    lemma_indexes: DashMap<LemmaId, Vec<IndexId>>,
    page_indexes: DashMap<PageId, Vec<IndexId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn remove_index_rows(&self, ids: &[IndexId]) -> Vec<IndexEntry> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, entry)) = self.indexes.remove(id) {
                if let Some(mut postings) = self.lemma_indexes.get_mut(&entry.lemma_id) {
                    postings.retain(|i| i != id);
                }
                removed.push(entry);
            }
        }
        removed
    }
}

impl PostingStore for MemoryStore {
    fn insert_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site, StoreError> {
        match self.site_urls.entry(url.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                entity: "site",
                key: url.to_string(),
            }),
            Entry::Vacant(slot) => {
                let site = Site {
                    id: self.next_id(),
                    url: url.to_string(),
                    name: name.to_string(),
                    status,
                    status_time: unix_now(),
                    last_error: None,
                };
                self.sites.insert(site.id, site.clone());
                slot.insert(site.id);
                Ok(site)
            }
        }
    }

    fn find_site(&self, id: SiteId) -> Result<Option<Site>, StoreError> {
        Ok(self.sites.get(&id).map(|s| s.clone()))
    }

    fn find_site_by_url(&self, url: &str) -> Result<Option<Site>, StoreError> {
        let id = match self.site_urls.get(url) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_site(id)
    }

    fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let mut sites: Vec<Site> = self.sites.iter().map(|s| s.value().clone()).collect();
        sites.sort_by_key(|s| s.id);
        Ok(sites)
    }

    fn update_site_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut site = self
            .sites
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "site", id })?;
        site.status = status;
        site.status_time = unix_now();
        site.last_error = last_error;
        Ok(())
    }

    fn delete_site_by_url(&self, url: &str) -> Result<bool, StoreError> {
        let site_id = match self.site_urls.remove(url) {
            Some((_, id)) => id,
            None => return Ok(false),
        };
        self.sites.remove(&site_id);

        let page_ids: Vec<PageId> = self
            .pages
            .iter()
            .filter(|p| p.site_id == site_id)
            .map(|p| p.id)
            .collect();
        for page_id in &page_ids {
            if let Some((_, page)) = self.pages.remove(page_id) {
                self.page_paths.remove(&(site_id, page.path));
            }
            if let Some((_, ids)) = self.page_indexes.remove(page_id) {
                for id in ids {
                    self.indexes.remove(&id);
                }
            }
        }

        let lemma_ids: Vec<LemmaId> = self
            .lemmas
            .iter()
            .filter(|l| l.site_id == site_id)
            .map(|l| l.id)
            .collect();
        for lemma_id in &lemma_ids {
            if let Some((_, lemma)) = self.lemmas.remove(lemma_id) {
                self.lemma_keys.remove(&(site_id, lemma.text));
            }
            self.lemma_indexes.remove(lemma_id);
        }

        Ok(true)
    }

    fn insert_page(&self, page: NewPage) -> Result<Option<Page>, StoreError> {
        match self.page_paths.entry((page.site_id, page.path.clone())) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let page = Page {
                    id: self.next_id(),
                    site_id: page.site_id,
                    path: page.path,
                    code: page.code,
                    content: page.content,
                    title: page.title,
                };
                self.pages.insert(page.id, page.clone());
                slot.insert(page.id);
                Ok(Some(page))
            }
        }
    }

    fn find_page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        Ok(self.pages.get(&id).map(|p| p.clone()))
    }

    fn find_page_by_path(&self, site_id: SiteId, path: &str) -> Result<Option<Page>, StoreError> {
        let id = match self.page_paths.get(&(site_id, path.to_string())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_page(id)
    }

    fn count_pages(&self, site_id: Option<SiteId>) -> Result<u64, StoreError> {
        Ok(match site_id {
            Some(site_id) => self.pages.iter().filter(|p| p.site_id == site_id).count() as u64,
            None => self.pages.len() as u64,
        })
    }

    fn find_lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>, StoreError> {
        let id = match self.lemma_keys.get(&(site_id, text.to_string())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_lemma_by_id(id)
    }

    fn find_lemma_by_id(&self, id: LemmaId) -> Result<Option<Lemma>, StoreError> {
        Ok(self.lemmas.get(&id).map(|l| l.clone()))
    }

    fn count_lemmas(&self, site_id: Option<SiteId>) -> Result<u64, StoreError> {
        Ok(match site_id {
            Some(site_id) => self.lemmas.iter().filter(|l| l.site_id == site_id).count() as u64,
            None => self.lemmas.len() as u64,
        })
    }

    fn merge_page(
        &self,
        site_id: SiteId,
        page_id: PageId,
        lemmas: &[(String, u32)],
    ) -> Result<PageMerge, StoreError> {
        let mut merge = PageMerge::default();
        for (text, rank) in lemmas {
            let lemma_id = match self.lemma_keys.entry((site_id, text.clone())) {
                Entry::Occupied(slot) => {
                    let id = *slot.get();
                    drop(slot);
                    let mut lemma = self
                        .lemmas
                        .get_mut(&id)
                        .ok_or(StoreError::NotFound { entity: "lemma", id })?;
                    lemma.frequency = lemma.frequency.saturating_add(1);
                    id
                }
                Entry::Vacant(slot) => {
                    let lemma = Lemma {
                        id: self.next_id(),
                        site_id,
                        text: text.clone(),
                        frequency: 1,
                    };
                    self.lemmas.insert(lemma.id, lemma.clone());
                    slot.insert(lemma.id);
                    merge.created.push(text.clone());
                    lemma.id
                }
            };

            let entry = IndexEntry {
                id: self.next_id(),
                page_id,
                lemma_id,
                rank: *rank,
            };
            self.indexes.insert(entry.id, entry.clone());
            self.lemma_indexes.entry(lemma_id).or_default().push(entry.id);
            self.page_indexes.entry(page_id).or_default().push(entry.id);
            merge.rows.push(entry);
        }
        Ok(merge)
    }

    fn remove_page(&self, page_id: PageId) -> Result<PageRemoval, StoreError> {
        if let Some((_, page)) = self.pages.remove(&page_id) {
            self.page_paths.remove(&(page.site_id, page.path));
        }
        let ids = self
            .page_indexes
            .remove(&page_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        let rows = self.remove_index_rows(&ids);

        let mut dropped = Vec::new();
        for entry in &rows {
            let last_page = match self.lemmas.get_mut(&entry.lemma_id) {
                Some(mut lemma) if lemma.frequency > 1 => {
                    lemma.frequency -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if last_page {
                if let Some((_, lemma)) = self.lemmas.remove(&entry.lemma_id) {
                    self.lemma_keys.remove(&(lemma.site_id, lemma.text.clone()));
                    self.lemma_indexes.remove(&lemma.id);
                    dropped.push(lemma.text);
                }
            }
        }
        Ok(PageRemoval { rows, dropped })
    }

    fn postings(&self, lemma_id: LemmaId) -> Result<Vec<IndexEntry>, StoreError> {
        let ids = match self.lemma_indexes.get(&lemma_id) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.indexes.get(id).map(|e| e.clone()))
            .collect())
    }

    fn indexes_for_page(&self, page_id: PageId) -> Result<Vec<IndexEntry>, StoreError> {
        let ids = match self.page_indexes.get(&page_id) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.indexes.get(id).map(|e| e.clone()))
            .collect())
    }

    fn pages_by_index_ids(&self, ids: &[IndexId]) -> Result<Vec<Page>, StoreError> {
        let mut seen = HashSet::new();
        let mut pages = Vec::new();
        for id in ids {
            let page_id = match self.indexes.get(id) {
                Some(entry) => entry.page_id,
                None => continue,
            };
            if seen.insert(page_id) {
                if let Some(page) = self.find_page(page_id)? {
                    pages.push(page);
                }
            }
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn test_sites() {
        conformance::sites(&MemoryStore::new());
    }

    #[test]
    fn test_pages() {
        conformance::pages(&MemoryStore::new());
    }

    #[test]
    fn test_lemmas_and_postings() {
        conformance::lemmas_and_postings(&MemoryStore::new());
    }

    #[test]
    fn test_cascade_delete() {
        conformance::cascade_delete(&MemoryStore::new());
    }

    #[test]
    fn test_concurrent_page_inserts_keep_paths_unique() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let site = store
            .insert_site("https://example.test", "Example", SiteStatus::Indexing)
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .insert_page(NewPage {
                            site_id: site.id,
                            path: "/same".to_string(),
                            code: 200,
                            content: String::new(),
                            title: None,
                        })
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(store.count_pages(Some(site.id)).unwrap(), 1);
    }
}
