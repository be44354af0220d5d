use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, SearchSettings};
use crate::models::{IndexId, Lemma, PageId, Site, SiteStatus};
use crate::morphology::Morphology;
use crate::snippet::{build_snippet, fallback_title, SnippetLimits};
use crate::store::{PostingStore, StoreError};
use crate::url_utils;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Empty search query")]
    EmptyQuery,

    #[error("No indexed sites to search")]
    NoIndexedSites,

    #[error("Site {0} is not known")]
    UnknownSite(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// One ranked page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matching pages before `offset`/`limit` are applied
    pub count: usize,
    #[serde(rename = "data")]
    pub hits: Vec<SearchHit>,
}

/// Candidate page of one site with its summed rank
struct Candidate {
    site_index: usize,
    page_id: PageId,
    /// An index row pointing at the page, used to load it
    index_id: IndexId,
    raw: u64,
}

/// Lemmas that survived filtering on one site
struct SiteMatch {
    site: Site,
    terms: Vec<String>,
}

pub struct QueryEngine {
    store: Arc<dyn PostingStore>,
    morphology: Arc<Morphology>,
    settings: SearchSettings,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn PostingStore>,
        morphology: Arc<Morphology>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            store,
            morphology,
            settings,
        }
    }

    pub fn default_limit(&self) -> usize {
        self.settings.default_limit
    }

    /// Ranked pages matching every meaningful word of `query`.
    ///
    /// With `site` only that site is searched, otherwise every INDEXED site.
    /// Relevance is the page's summed rank divided by the best page's.
    pub fn search(
        &self,
        query: &str,
        site: Option<&str>,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<SearchResults, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let limit = limit.unwrap_or(self.settings.default_limit);

        let lemmas = self.morphology.query_lemmas(query);
        let sites = self.scope(site)?;
        if lemmas.is_empty() {
            return Ok(SearchResults::default());
        }

        // Popularity is judged against every stored page, not one site's share
        let total_pages = self.store.count_pages(None)?;
        if total_pages == 0 {
            return Ok(SearchResults::default());
        }

        let mut matches = Vec::new();
        let mut candidates = Vec::new();
        for site in sites {
            let site_index = matches.len();
            if let Some((terms, found)) =
                self.search_site(&site, &lemmas, total_pages, site_index)?
            {
                matches.push(SiteMatch { site, terms });
                candidates.extend(found);
            }
        }

        let max_raw = candidates.iter().map(|c| c.raw).max().unwrap_or(0);
        if max_raw == 0 {
            return Ok(SearchResults::default());
        }

        let mut ranked: Vec<(f32, Candidate)> = candidates
            .into_iter()
            .map(|c| (c.raw as f32 / max_raw as f32, c))
            .collect();
        // sort_by is stable: equal relevance keeps site, then page order
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let count = ranked.len();
        let window: Vec<(f32, Candidate)> = ranked.into_iter().skip(offset).take(limit).collect();
        let hits = self.render(&matches, window)?;

        debug!("Query '{}' matched {} pages, returning {}", query, count, hits.len());
        Ok(SearchResults { count, hits })
    }

    fn scope(&self, site: Option<&str>) -> Result<Vec<Site>, SearchError> {
        match site {
            Some(url) => {
                let root = url_utils::site_root(url.trim())
                    .ok_or_else(|| SearchError::UnknownSite(url.to_string()))?;
                let site = self
                    .store
                    .find_site_by_url(&root)?
                    .ok_or_else(|| SearchError::UnknownSite(url.to_string()))?;
                Ok(vec![site])
            }
            None => {
                let sites: Vec<Site> = self
                    .store
                    .list_sites()?
                    .into_iter()
                    .filter(|s| s.status == SiteStatus::Indexed)
                    .collect();
                if sites.is_empty() {
                    return Err(SearchError::NoIndexedSites);
                }
                Ok(sites)
            }
        }
    }

    /// Surviving lemma texts and candidate pages of one site
    fn search_site(
        &self,
        site: &Site,
        lemmas: &[String],
        total_pages: u64,
        site_index: usize,
    ) -> Result<Option<(Vec<String>, Vec<Candidate>)>, SearchError> {
        let single_lemma = lemmas.len() == 1;
        let mut found: Vec<Lemma> = Vec::new();
        for text in lemmas {
            let lemma = match self.store.find_lemma(site.id, text)? {
                Some(lemma) => lemma,
                None => continue,
            };
            let share = u64::from(lemma.frequency) * 100 / total_pages;
            if single_lemma || share <= u64::from(self.settings.popular_lemma_percent) {
                found.push(lemma);
            } else {
                debug!(
                    "Ignoring lemma '{}' on {}: present on {}% of all pages",
                    lemma.text, site.url, share
                );
            }
        }
        if found.is_empty() {
            return Ok(None);
        }

        // Rarest first keeps the running intersection small
        found.sort_by_key(|l| l.frequency);

        let mut pages: HashMap<PageId, (IndexId, u64)> = HashMap::new();
        let mut order: Vec<PageId> = Vec::new();
        for posting in self.store.postings(found[0].id)? {
            if pages
                .insert(posting.page_id, (posting.id, u64::from(posting.rank)))
                .is_none()
            {
                order.push(posting.page_id);
            }
        }

        for lemma in &found[1..] {
            if pages.is_empty() {
                break;
            }
            let ranks: HashMap<PageId, u32> = self
                .store
                .postings(lemma.id)?
                .into_iter()
                .map(|p| (p.page_id, p.rank))
                .collect();
            pages.retain(|page_id, entry| match ranks.get(page_id) {
                Some(rank) => {
                    entry.1 += u64::from(*rank);
                    true
                }
                None => false,
            });
        }

        order.retain(|page_id| pages.contains_key(page_id));
        order.sort_unstable();

        let candidates = order
            .into_iter()
            .filter_map(|page_id| {
                pages.get(&page_id).map(|(index_id, raw)| Candidate {
                    site_index,
                    page_id,
                    index_id: *index_id,
                    raw: *raw,
                })
            })
            .collect();
        let terms = found.into_iter().map(|l| l.text).collect();
        Ok(Some((terms, candidates)))
    }

    fn render(
        &self,
        matches: &[SiteMatch],
        window: Vec<(f32, Candidate)>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let index_ids: Vec<IndexId> = window.iter().map(|(_, c)| c.index_id).collect();
        let pages: HashMap<PageId, _> = self
            .store
            .pages_by_index_ids(&index_ids)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let limits = SnippetLimits::from(&self.settings);
        let mut hits = Vec::with_capacity(window.len());
        for (relevance, candidate) in window {
            // Removed by a concurrent re-index of the page
            let page = match pages.get(&candidate.page_id) {
                Some(page) => page,
                None => continue,
            };
            let site_match = &matches[candidate.site_index];

            let title = page
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| fallback_title(&page.content, Config::FALLBACK_TITLE_WORDS));

            hits.push(SearchHit {
                site: site_match.site.url.clone(),
                site_name: site_match.site.name.clone(),
                uri: page.path.clone(),
                title,
                snippet: build_snippet(&page.content, &site_match.terms, &limits),
                relevance,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPage, SiteId};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: QueryEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let engine = QueryEngine::new(
            store.clone(),
            Arc::new(Morphology::default()),
            SearchSettings::default(),
        );
        Fixture { store, engine }
    }

    /// Store a page with precomputed lemma counts, maintaining frequencies
    fn add_page(store: &MemoryStore, site_id: SiteId, path: &str, content: &str, lemmas: &[(&str, u32)]) {
        let page = store
            .insert_page(NewPage {
                site_id,
                path: path.to_string(),
                code: 200,
                content: content.to_string(),
                title: None,
            })
            .unwrap()
            .unwrap();
        let counts: Vec<(String, u32)> = lemmas.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        store.merge_page(site_id, page.id, &counts).unwrap();
    }

    fn indexed_site(store: &MemoryStore, url: &str) -> SiteId {
        store.insert_site(url, "Site", SiteStatus::Indexed).unwrap().id
    }

    #[test]
    fn test_empty_query() {
        let f = fixture();
        assert!(matches!(f.engine.search("  ", None, 0, None), Err(SearchError::EmptyQuery)));
    }

    #[test]
    fn test_no_indexed_sites() {
        let f = fixture();
        f.store
            .insert_site("https://example.test", "Example", SiteStatus::Indexing)
            .unwrap();
        assert!(matches!(
            f.engine.search("кот", None, 0, None),
            Err(SearchError::NoIndexedSites)
        ));
    }

    #[test]
    fn test_unknown_site_filter() {
        let f = fixture();
        indexed_site(&f.store, "https://example.test");
        assert!(matches!(
            f.engine.search("кот", Some("https://nope.test"), 0, None),
            Err(SearchError::UnknownSite(_))
        ));
    }

    #[test]
    fn test_ranking_and_relevance() {
        let f = fixture();
        let site = indexed_site(&f.store, "https://example.test");
        add_page(&f.store, site, "/a", "кот кот собака", &[("кот", 2), ("собака", 1)]);
        add_page(&f.store, site, "/b", "кот", &[("кот", 1)]);

        let results = f.engine.search("кот", None, 0, None).unwrap();
        assert_eq!(results.count, 2);
        assert_eq!(results.hits[0].uri, "/a");
        assert_eq!(results.hits[0].relevance, 1.0);
        assert_eq!(results.hits[1].uri, "/b");
        assert_eq!(results.hits[1].relevance, 0.5);
        assert_eq!(results.hits[1].snippet, "<b>кот</b>");
        assert_eq!(results.hits[1].title, "кот");
        assert_eq!(results.hits[0].site, "https://example.test");
    }

    #[test]
    fn test_intersection_requires_all_lemmas() {
        let f = fixture();
        let site = indexed_site(&f.store, "https://example.test");
        add_page(&f.store, site, "/a", "кот собака", &[("кот", 1), ("собака", 1)]);
        add_page(&f.store, site, "/b", "кот", &[("кот", 1)]);
        add_page(&f.store, site, "/c", "дом", &[("дом", 1)]);
        add_page(&f.store, site, "/d", "дом", &[("дом", 1)]);

        let results = f.engine.search("кот собака", None, 0, None).unwrap();
        let uris: Vec<&str> = results.hits.iter().map(|h| h.uri.as_str()).collect();
        assert_eq!(uris, vec!["/a"]);
        assert_eq!(results.hits[0].snippet, "<b>кот</b> <b>собака</b>");
    }

    #[test]
    fn test_popular_lemma_dropped_only_for_multi_lemma_queries() {
        let f = fixture();
        let site = indexed_site(&f.store, "https://example.test");
        // "кот" on 5 of 5 pages (100%), "собака" on 1
        for i in 0..4 {
            add_page(&f.store, site, &format!("/p{}", i), "кот", &[("кот", 1)]);
        }
        add_page(&f.store, site, "/dog", "кот собака", &[("кот", 1), ("собака", 1)]);

        let single = f.engine.search("кот", None, 0, None).unwrap();
        assert_eq!(single.count, 5);

        let multi = f.engine.search("кот собака", None, 0, None).unwrap();
        assert_eq!(multi.count, 1);
        assert_eq!(multi.hits[0].uri, "/dog");
        // only the surviving lemma is highlighted
        assert_eq!(multi.hits[0].snippet, "кот <b>собака</b>");
    }

    #[test]
    fn test_popularity_counts_pages_of_every_site() {
        let f = fixture();
        let small = indexed_site(&f.store, "https://small.test");
        let large = indexed_site(&f.store, "https://large.test");
        // Both lemmas cover all of the small site but 1 of 5 stored pages
        add_page(&f.store, small, "/", "кот и дом", &[("кот", 1), ("дом", 1)]);
        for i in 0..4 {
            add_page(&f.store, large, &format!("/p{}", i), "сад", &[("сад", 1)]);
        }

        let results = f.engine.search("кот дом", None, 0, None).unwrap();
        assert_eq!(results.count, 1);
        assert_eq!(results.hits[0].site, "https://small.test");
        assert_eq!(results.hits[0].snippet, "<b>кот</b> и <b>дом</b>");

        let scoped = f.engine.search("кот дом", Some("https://small.test"), 0, None).unwrap();
        assert_eq!(scoped.count, 1);
    }

    #[test]
    fn test_offset_and_limit() {
        let f = fixture();
        let site = indexed_site(&f.store, "https://example.test");
        for i in 1..=5u32 {
            add_page(&f.store, site, &format!("/p{}", i), "кот", &[("кот", i)]);
        }

        let page = f.engine.search("кот", None, 1, Some(2)).unwrap();
        assert_eq!(page.count, 5);
        let uris: Vec<&str> = page.hits.iter().map(|h| h.uri.as_str()).collect();
        assert_eq!(uris, vec!["/p4", "/p3"]);

        let past_end = f.engine.search("кот", None, 10, None).unwrap();
        assert_eq!(past_end.count, 5);
        assert!(past_end.hits.is_empty());
    }

    #[test]
    fn test_relevance_is_normalized_across_sites() {
        let f = fixture();
        let first = indexed_site(&f.store, "https://one.test");
        let second = indexed_site(&f.store, "https://two.test");
        add_page(&f.store, first, "/", "кот", &[("кот", 1)]);
        add_page(&f.store, second, "/", "кот кот кот кот", &[("кот", 4)]);

        let all = f.engine.search("кот", None, 0, None).unwrap();
        assert_eq!(all.hits[0].site, "https://two.test");
        assert_eq!(all.hits[1].relevance, 0.25);

        let only_first = f.engine.search("кот", Some("https://one.test/"), 0, None).unwrap();
        assert_eq!(only_first.count, 1);
        assert_eq!(only_first.hits[0].relevance, 1.0);
    }

    #[test]
    fn test_query_of_function_words_is_empty() {
        let f = fixture();
        let site = indexed_site(&f.store, "https://example.test");
        add_page(&f.store, site, "/a", "кот", &[("кот", 1)]);
        let results = f.engine.search("и в на", None, 0, None).unwrap();
        assert_eq!(results, SearchResults::default());
    }

    #[test]
    fn test_ties_keep_page_order() {
        let f = fixture();
        let site = indexed_site(&f.store, "https://example.test");
        add_page(&f.store, site, "/x", "кот", &[("кот", 1)]);
        add_page(&f.store, site, "/y", "кот", &[("кот", 1)]);
        add_page(&f.store, site, "/z", "кот", &[("кот", 1)]);

        let results = f.engine.search("кот", None, 0, None).unwrap();
        let uris: Vec<&str> = results.hits.iter().map(|h| h.uri.as_str()).collect();
        assert_eq!(uris, vec!["/x", "/y", "/z"]);
    }
}
