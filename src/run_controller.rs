//! Single-flight coordination of indexing runs, single-page re-indexing and
//! index statistics.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::cache::ExistenceCache;
use crate::config::{AppConfig, Config, SiteConfig};
use crate::crawler::{crawl_site, CrawlContext, CrawlError, CrawlerConfig, SiteCrawlReport};
use crate::indexer::{Indexer, MergeStats};
use crate::models::{NewPage, PageId, Site, SiteId, SiteStatus};
use crate::morphology::Morphology;
use crate::network::{FetchError, Fetcher};
use crate::search::{QueryEngine, SearchError, SearchResults};
use crate::store::{self, PostingStore, StoreError};
use crate::url_utils;

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Indexing is already running")]
    AlreadyRunning,

    #[error("Indexing is not running")]
    NotRunning,

    #[error("No sites are configured")]
    NoConfiguredSites,

    #[error("Page {0} is outside the configured sites")]
    OutsideConfiguredSites(String),

    #[error("Invalid page URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Lifecycle of the controller; at most one run is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Stopping,
            _ => RunState::Idle,
        }
    }
}

/// Terminal state of one site after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteOutcome {
    pub site_id: SiteId,
    pub url: String,
    pub status: SiteStatus,
    pub pages_indexed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub sites: Vec<SiteOutcome>,
    /// The run was cut short by `stop_run`
    pub stopped: bool,
}

/// Result of `index_single_page`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageReindex {
    pub site_id: SiteId,
    pub page_id: PageId,
    /// Index rows removed along with the previous copy of the page
    pub replaced_rows: usize,
    pub merge: MergeStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalStatistics {
    pub sites: usize,
    pub pages: u64,
    pub lemmas: u64,
    pub indexing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    pub status_time: u64,
    pub error: Option<String>,
    pub pages: u64,
    pub lemmas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: TotalStatistics,
    pub detailed: Vec<SiteStatistics>,
}

/// Handles of the run in flight, used by `stop_run`
struct ActiveRun {
    stop: watch::Sender<bool>,
    permits: Arc<Semaphore>,
}

/// Resolves once `true` was sent; pends forever if the sender goes away first
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    if stop_rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct RunController {
    sites: Vec<SiteConfig>,
    max_workers: usize,
    crawler_config: Arc<CrawlerConfig>,
    store: Arc<dyn PostingStore>,
    fetcher: Arc<dyn Fetcher>,
    indexer: Arc<Indexer>,
    engine: QueryEngine,
    state: AtomicU8,
    active: Mutex<Option<ActiveRun>>,
}

impl RunController {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn PostingStore>,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn ExistenceCache>,
        morphology: Arc<Morphology>,
    ) -> Self {
        let indexer = Arc::new(Indexer::new(store.clone(), cache, morphology.clone()));
        let engine = QueryEngine::new(store.clone(), morphology, config.search.clone());
        Self {
            sites: config.sites.clone(),
            max_workers: config.crawler.max_workers.max(1),
            crawler_config: Arc::new(CrawlerConfig::from(&config.crawler)),
            store,
            fetcher,
            indexer,
            engine,
            state: AtomicU8::new(RunState::Idle as u8),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_indexing(&self) -> bool {
        self.state() != RunState::Idle
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Start crawling every configured site.
    ///
    /// Existing rows of those sites are deleted and the sites recreated as
    /// INDEXING before this returns. The handle resolves once every site has
    /// reached a terminal status.
    pub fn start_run(self: &Arc<Self>) -> Result<JoinHandle<RunReport>, IndexingError> {
        let (stop_rx, permits) = {
            // Claimed under the same lock `stop_run` takes, so a stop that
            // lands while sites are being prepared still finds the channel
            let mut active = self.active.lock();
            if !self.transition(RunState::Idle, RunState::Running) {
                return Err(IndexingError::AlreadyRunning);
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            let permits = Arc::new(Semaphore::new(self.max_workers));
            *active = Some(ActiveRun {
                stop: stop_tx,
                permits: permits.clone(),
            });
            (stop_rx, permits)
        };

        let sites = match self.prepare_sites() {
            Ok(sites) => sites,
            Err(e) => {
                self.active.lock().take();
                self.state.store(RunState::Idle as u8, Ordering::Release);
                return Err(e);
            }
        };

        info!(
            "Indexing run started for {} sites with {} workers",
            sites.len(),
            self.max_workers
        );

        let controller = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let report = controller.run(sites, stop_rx, permits).await;
            {
                let mut active = controller.active.lock();
                active.take();
                controller
                    .state
                    .store(RunState::Idle as u8, Ordering::Release);
            }
            info!(
                "Indexing run finished ({} sites, stopped: {})",
                report.sites.len(),
                report.stopped
            );
            report
        }))
    }

    /// Request the active run to stop.
    ///
    /// Pending page tasks are skipped, in-flight fetches are abandoned and
    /// sites still INDEXING end FAILED. Returns without waiting for teardown.
    pub fn stop_run(&self) -> Result<(), IndexingError> {
        let active = self.active.lock();
        if !self.transition(RunState::Running, RunState::Stopping) {
            return Err(IndexingError::NotRunning);
        }
        if let Some(active) = active.as_ref() {
            active.permits.close();
            let _ = active.stop.send(true);
        }
        info!("Stop requested for the indexing run");
        Ok(())
    }

    fn prepare_sites(&self) -> Result<Vec<Site>, IndexingError> {
        if self.sites.is_empty() {
            return Err(IndexingError::NoConfiguredSites);
        }

        let mut prepared = Vec::with_capacity(self.sites.len());
        for configured in &self.sites {
            if self.store.delete_site_by_url(&configured.url)? {
                info!("Dropped previous index of {}", configured.url);
            }
            let site =
                self.store
                    .insert_site(&configured.url, &configured.name, SiteStatus::Indexing)?;
            prepared.push(site);
        }
        Ok(prepared)
    }

    async fn run(
        &self,
        sites: Vec<Site>,
        mut stop_rx: watch::Receiver<bool>,
        permits: Arc<Semaphore>,
    ) -> RunReport {
        let mut tasks = JoinSet::new();
        for site in &sites {
            let ctx = Arc::new(CrawlContext::new(
                site.clone(),
                stop_rx.clone(),
                permits.clone(),
                self.fetcher.clone(),
                self.store.clone(),
                self.indexer.clone(),
                self.crawler_config.clone(),
            ));
            let site_id = site.id;
            tasks.spawn(async move { (site_id, crawl_site(ctx).await) });
        }

        let mut report = RunReport::default();
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((site_id, outcome))) => {
                        if let Some(site) = sites.iter().find(|s| s.id == site_id) {
                            report.sites.push(self.finish_site(site, outcome));
                        }
                    }
                    Some(Err(e)) => error!("Site crawl task failed: {}", e),
                    None => break,
                },
                _ = stop_requested(&mut stop_rx) => {
                    // Tear down every crawl tree; in-flight fetches are abandoned
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        // Crawls that completed before the abort keep their outcome
                        if let Ok((site_id, outcome)) = joined {
                            if let Some(site) = sites.iter().find(|s| s.id == site_id) {
                                report.sites.push(self.finish_site(site, outcome));
                            }
                        }
                    }
                    report.stopped = true;
                    break;
                }
            }
        }

        // A stop that raced the last crawl to completion still counts
        if *stop_rx.borrow() {
            report.stopped = true;
        }
        if report.stopped {
            for site in &sites {
                if report.sites.iter().any(|o| o.site_id == site.id) {
                    continue;
                }
                report.sites.push(self.fail_site(site, Config::STOPPED_BY_USER, 0));
            }
        }
        report
    }

    fn finish_site(
        &self,
        site: &Site,
        outcome: Result<SiteCrawlReport, CrawlError>,
    ) -> SiteOutcome {
        match outcome {
            Ok(crawl) if crawl.stopped => {
                self.fail_site(site, Config::STOPPED_BY_USER, crawl.pages_indexed)
            }
            Ok(crawl) => {
                if let Err(e) = self
                    .store
                    .update_site_status(site.id, SiteStatus::Indexed, None)
                {
                    error!("Failed to mark {} as indexed: {}", site.url, e);
                }
                info!("Site {} indexed ({} pages)", site.url, crawl.pages_indexed);
                SiteOutcome {
                    site_id: site.id,
                    url: site.url.clone(),
                    status: SiteStatus::Indexed,
                    pages_indexed: crawl.pages_indexed,
                    error: None,
                }
            }
            Err(e) => {
                let message = match &e {
                    CrawlError::RootUnavailable { .. } => {
                        warn!("{}", e);
                        format!("{}: {}", Config::ROOT_UNREACHABLE, e)
                    }
                    CrawlError::Store(_) => {
                        error!("Indexing of {} aborted: {}", site.url, e);
                        e.to_string()
                    }
                };
                let pages = self.store.count_pages(Some(site.id)).unwrap_or(0) as usize;
                self.fail_site(site, &message, pages)
            }
        }
    }

    fn fail_site(&self, site: &Site, message: &str, pages_indexed: usize) -> SiteOutcome {
        if let Err(e) =
            self.store
                .update_site_status(site.id, SiteStatus::Failed, Some(message.to_string()))
        {
            error!("Failed to mark {} as failed: {}", site.url, e);
        }
        SiteOutcome {
            site_id: site.id,
            url: site.url.clone(),
            status: SiteStatus::Failed,
            pages_indexed,
            error: Some(message.to_string()),
        }
    }

    /// Fetch and (re)index one page of a configured site.
    ///
    /// The site row is created as INDEXED when missing. A previous copy of
    /// the page is replaced only after the new one was fetched.
    #[tracing::instrument(skip(self))]
    pub async fn index_single_page(&self, url: &str) -> Result<PageReindex, IndexingError> {
        let url = url.trim();
        let configured = self
            .sites
            .iter()
            .find(|site| url_utils::is_same_origin(url, &site.url))
            .ok_or_else(|| IndexingError::OutsideConfiguredSites(url.to_string()))?;
        let path = url_utils::page_path_of(url)
            .ok_or_else(|| IndexingError::InvalidUrl(url.to_string()))?;

        let site = self.find_or_create_site(configured)?;

        let fetched = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| IndexingError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let previous = {
            let (site_id, path) = (site.id, path.clone());
            store::blocking(&self.store, move |store| store.find_page_by_path(site_id, &path))
                .await?
        };
        let replaced_rows = match previous {
            Some(previous) => self.indexer.remove_page(site.id, previous.id).await?,
            None => 0,
        };

        let new_page = NewPage {
            site_id: site.id,
            path: path.clone(),
            code: fetched.status,
            content: fetched.text,
            title: fetched.title,
        };
        let page = store::blocking(&self.store, move |store| store.insert_page(new_page))
            .await?
            .ok_or_else(|| StoreError::Duplicate {
                entity: "page",
                key: path.clone(),
            })?;
        let merge = self.indexer.index_page(&page).await?;

        info!(
            "Indexed single page {} ({} lemmas, {} old rows replaced)",
            url, merge.indexed, replaced_rows
        );
        Ok(PageReindex {
            site_id: site.id,
            page_id: page.id,
            replaced_rows,
            merge,
        })
    }

    fn find_or_create_site(&self, configured: &SiteConfig) -> Result<Site, StoreError> {
        if let Some(site) = self.store.find_site_by_url(&configured.url)? {
            return Ok(site);
        }
        match self
            .store
            .insert_site(&configured.url, &configured.name, SiteStatus::Indexed)
        {
            Ok(site) => Ok(site),
            // Created concurrently by another request
            Err(StoreError::Duplicate { .. }) => self
                .store
                .find_site_by_url(&configured.url)?
                .ok_or(StoreError::NotFound {
                    entity: "site",
                    id: 0,
                }),
            Err(e) => Err(e),
        }
    }

    pub fn statistics(&self) -> Result<Statistics, StoreError> {
        let sites = self.store.list_sites()?;
        let mut detailed = Vec::with_capacity(sites.len());
        for site in sites {
            detailed.push(SiteStatistics {
                pages: self.store.count_pages(Some(site.id))?,
                lemmas: self.store.count_lemmas(Some(site.id))?,
                url: site.url,
                name: site.name,
                status: site.status,
                status_time: site.status_time,
                error: site.last_error,
            });
        }

        Ok(Statistics {
            total: TotalStatistics {
                sites: detailed.len(),
                pages: detailed.iter().map(|s| s.pages).sum(),
                lemmas: detailed.iter().map(|s| s.lemmas).sum(),
                indexing: self.is_indexing(),
            },
            detailed,
        })
    }

    pub fn search(
        &self,
        query: &str,
        site: Option<&str>,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<SearchResults, SearchError> {
        self.engine.search(query, site, offset, limit)
    }
}
