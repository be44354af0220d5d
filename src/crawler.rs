use dashmap::DashSet;
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CrawlerSettings;
use crate::indexer::Indexer;
use crate::models::{NewPage, PageUrl, Site};
use crate::network::{FetchError, Fetcher};
use crate::store::{self, PostingStore, StoreError};
use crate::url_utils;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Root page {url} could not be fetched: {source}")]
    RootUnavailable {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub request_delay: Duration,
    pub skip_patterns: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::from(&CrawlerSettings::default())
    }
}

impl From<&CrawlerSettings> for CrawlerConfig {
    fn from(settings: &CrawlerSettings) -> Self {
        Self {
            request_delay: Duration::from_millis(settings.request_delay_ms),
            skip_patterns: settings.skip_patterns.clone(),
        }
    }
}

/// State shared by every task crawling one site during one run
pub struct CrawlContext {
    pub site: Site,
    /// Paths already claimed in this run
    pub visited: DashSet<String>,
    stop: watch::Receiver<bool>,
    permits: Arc<Semaphore>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn PostingStore>,
    indexer: Arc<Indexer>,
    config: Arc<CrawlerConfig>,
    pages_indexed: AtomicUsize,
    fetch_failures: AtomicUsize,
}

impl CrawlContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        site: Site,
        stop: watch::Receiver<bool>,
        permits: Arc<Semaphore>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn PostingStore>,
        indexer: Arc<Indexer>,
        config: Arc<CrawlerConfig>,
    ) -> Self {
        Self {
            site,
            visited: DashSet::new(),
            stop,
            permits,
            fetcher,
            store,
            indexer,
            config,
            pages_indexed: AtomicUsize::new(0),
            fetch_failures: AtomicUsize::new(0),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn report(&self) -> SiteCrawlReport {
        SiteCrawlReport {
            site_id: self.site.id,
            pages_indexed: self.pages_indexed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            stopped: self.is_stopped(),
        }
    }
}

/// Totals for one site after its crawl tree finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteCrawlReport {
    pub site_id: u64,
    pub pages_indexed: usize,
    pub fetch_failures: usize,
    /// The stop signal was raised while crawling
    pub stopped: bool,
}

enum Visit {
    Done(PageUrl),
    Skipped,
    FetchFailed(FetchError),
}

/// Crawl and index one site, starting from its root page.
///
/// Fails only when the root page cannot be fetched or storage fails; broken
/// links further down end their own subtree.
#[tracing::instrument(skip(ctx), fields(site = %ctx.site.url))]
pub async fn crawl_site(ctx: Arc<CrawlContext>) -> Result<SiteCrawlReport, CrawlError> {
    let root = PageUrl::root(&ctx.site.url);
    ctx.visited.insert(root.path.clone());
    let root_url = root.absolute_url.clone();

    let root = match visit(&ctx, root).await? {
        Visit::Done(node) => node,
        Visit::Skipped => return Ok(ctx.report()),
        Visit::FetchFailed(source) => {
            return Err(CrawlError::RootUnavailable {
                url: root_url,
                source,
            })
        }
    };

    join_children(&ctx, root).await?;

    let report = ctx.report();
    info!(
        "Crawl of {} finished: {} pages indexed, {} fetch failures",
        ctx.site.url, report.pages_indexed, report.fetch_failures
    );
    Ok(report)
}

fn crawl_tree(ctx: Arc<CrawlContext>, node: PageUrl) -> BoxFuture<'static, Result<(), CrawlError>> {
    async move {
        match visit(&ctx, node).await? {
            Visit::Done(node) => join_children(&ctx, node).await,
            Visit::Skipped => Ok(()),
            Visit::FetchFailed(_) => Ok(()),
        }
    }
    .boxed()
}

/// Fan out one task per child and wait for all of them.
/// Dropping this future aborts the whole subtree.
async fn join_children(ctx: &Arc<CrawlContext>, node: PageUrl) -> Result<(), CrawlError> {
    if node.children.is_empty() {
        return Ok(());
    }

    let mut tasks = JoinSet::new();
    for child in node.children {
        tasks.spawn(crawl_tree(ctx.clone(), child));
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Crawl task for a child of {} failed: {}", node.absolute_url, e),
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Fetch, save and index one page; returns it with its unvisited children.
async fn visit(ctx: &CrawlContext, mut node: PageUrl) -> Result<Visit, CrawlError> {
    if ctx.is_stopped() {
        return Ok(Visit::Skipped);
    }

    // Held through fetch and merge, released before the children run
    let _permit = match ctx.permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return Ok(Visit::Skipped),
    };
    if ctx.is_stopped() {
        return Ok(Visit::Skipped);
    }

    sleep(ctx.config.request_delay).await;

    let fetched = match ctx.fetcher.fetch(&node.absolute_url).await {
        Ok(page) => page,
        Err(e) => {
            ctx.fetch_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Failed to fetch {} (linked from {}): {}",
                node.absolute_url,
                node.parent.as_deref().unwrap_or("-"),
                e
            );
            return Ok(Visit::FetchFailed(e));
        }
    };

    node.status = fetched.status;
    node.content = fetched.text;

    for link in &fetched.links {
        if let Some((absolute_url, path)) = accept_link(ctx, &node.absolute_url, link) {
            if ctx.visited.insert(path.clone()) {
                let child = node.child(absolute_url, path);
                node.children.push(child);
            }
        }
    }

    let new_page = NewPage {
        site_id: ctx.site.id,
        path: node.path.clone(),
        code: node.status,
        content: node.content.clone(),
        title: fetched.title,
    };
    let saved = store::blocking(&ctx.store, move |store| store.insert_page(new_page)).await?;

    match saved {
        Some(page) => {
            let stats = ctx.indexer.index_page(&page).await?;
            ctx.pages_indexed.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Indexed {} ({} lemmas, {} links queued)",
                node.absolute_url,
                stats.indexed,
                node.children.len()
            );
        }
        None => debug!("Page {} already saved, skipping", node.path),
    }

    Ok(Visit::Done(node))
}

/// Resolve a link against the page it was found on and keep it only if it
/// stays on the site. Returns the fragment-free absolute URL and its path.
fn accept_link(ctx: &CrawlContext, page_url: &str, link: &str) -> Option<(String, String)> {
    let absolute = url_utils::convert_to_absolute_url(link, page_url).ok()?;
    if !url_utils::should_crawl_url(&absolute, &ctx.config.skip_patterns) {
        return None;
    }
    if !url_utils::is_same_origin(&absolute, &ctx.site.url) {
        return None;
    }

    let mut parsed = Url::parse(&absolute).ok()?;
    parsed.set_fragment(None);
    let path = url_utils::page_path(&parsed);
    Some((parsed.to_string(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;
    use crate::models::SiteStatus;
    use crate::morphology::Morphology;
    use crate::network::StaticFetcher;
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        fetcher: Arc<StaticFetcher>,
        stop_tx: watch::Sender<bool>,
        ctx: Arc<CrawlContext>,
    }

    fn harness(fetcher: StaticFetcher, workers: usize) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let site = store
            .insert_site("https://example.test", "Example", SiteStatus::Indexing)
            .unwrap();
        let fetcher = Arc::new(fetcher);
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            Arc::new(NoopCache),
            Arc::new(Morphology::default()),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let config = CrawlerConfig {
            request_delay: Duration::ZERO,
            skip_patterns: vec!["instagram".to_string()],
        };
        let ctx = Arc::new(CrawlContext::new(
            site,
            stop_rx,
            Arc::new(Semaphore::new(workers)),
            fetcher.clone(),
            store.clone(),
            indexer,
            Arc::new(config),
        ));
        Harness {
            store,
            fetcher,
            stop_tx,
            ctx,
        }
    }

    fn sample_site() -> StaticFetcher {
        StaticFetcher::new()
            .with_page(
                "https://example.test/",
                r##"<html><body><p>главная страница</p>
                   <a href="/a">a</a><a href="/b#top">b</a><a href="https://example.test/a/">a again</a>
                   <a href="https://other.test/x">external</a><a href="http://example.test/c">other scheme</a>
                   <a href="/logo.png">image</a><a href="/go/instagram">social</a></body></html>"##,
            )
            .with_page(
                "https://example.test/a",
                r#"<html><body><p>кот кот собака</p><a href="/">home</a><a href="/b">b</a></body></html>"#,
            )
            .with_page(
                "https://example.test/b",
                r#"<html><body><p>кот</p><a href="/missing">broken</a><a href="/a">a</a></body></html>"#,
            )
    }

    #[tokio::test]
    async fn test_crawls_site_within_origin() {
        let h = harness(sample_site(), 4);
        let report = crawl_site(h.ctx.clone()).await.unwrap();

        assert_eq!(report.pages_indexed, 3);
        assert_eq!(report.fetch_failures, 1);
        assert!(!report.stopped);

        let site_id = h.ctx.site.id;
        assert_eq!(h.store.count_pages(Some(site_id)).unwrap(), 3);
        for path in ["/", "/a", "/b"] {
            assert!(h.store.find_page_by_path(site_id, path).unwrap().is_some());
        }

        assert_eq!(h.fetcher.request_count("https://other.test/x"), 0);
        assert_eq!(h.fetcher.request_count("http://example.test/c"), 0);
        assert_eq!(h.fetcher.request_count("https://example.test/logo.png"), 0);
        assert_eq!(h.fetcher.request_count("https://example.test/go/instagram"), 0);
    }

    #[tokio::test]
    async fn test_each_path_fetched_once() {
        let h = harness(sample_site(), 2);
        crawl_site(h.ctx.clone()).await.unwrap();

        assert_eq!(h.fetcher.request_count("https://example.test/"), 1);
        assert_eq!(h.fetcher.request_count("https://example.test/a"), 1);
        assert_eq!(h.fetcher.request_count("https://example.test/b"), 1);
        assert_eq!(h.fetcher.request_count("https://example.test/missing"), 1);
        assert_eq!(h.fetcher.total_requests(), 4);
    }

    #[tokio::test]
    async fn test_lemma_frequencies_after_crawl() {
        let h = harness(sample_site(), 4);
        crawl_site(h.ctx.clone()).await.unwrap();

        let site_id = h.ctx.site.id;
        let cat = h.store.find_lemma(site_id, "кот").unwrap().unwrap();
        assert_eq!(cat.frequency, 2);
        let a = h.store.find_page_by_path(site_id, "/a").unwrap().unwrap();
        let rank_on_a = h
            .store
            .postings(cat.id)
            .unwrap()
            .into_iter()
            .find(|e| e.page_id == a.id)
            .map(|e| e.rank);
        assert_eq!(rank_on_a, Some(2));
    }

    #[tokio::test]
    async fn test_unreachable_root_fails_the_site() {
        let h = harness(StaticFetcher::new(), 1);
        let err = crawl_site(h.ctx.clone()).await.unwrap_err();
        assert!(matches!(err, CrawlError::RootUnavailable { .. }));
        assert_eq!(h.store.count_pages(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_raised_stop_signal_skips_everything() {
        let h = harness(sample_site(), 1);
        h.stop_tx.send(true).unwrap();

        let report = crawl_site(h.ctx.clone()).await.unwrap();
        assert!(report.stopped);
        assert_eq!(report.pages_indexed, 0);
        assert_eq!(h.fetcher.total_requests(), 0);
    }

    #[test]
    fn test_accept_link() {
        let h = harness(StaticFetcher::new(), 1);
        let page = "https://example.test/dir/page";
        assert_eq!(
            accept_link(&h.ctx, page, "next#frag"),
            Some((
                "https://example.test/dir/next".to_string(),
                "/dir/next".to_string()
            ))
        );
        assert_eq!(
            accept_link(&h.ctx, page, "/list?page=2"),
            Some((
                "https://example.test/list?page=2".to_string(),
                "/list?page=2".to_string()
            ))
        );
        assert_eq!(accept_link(&h.ctx, page, "https://www.example.test/"), None);
        assert_eq!(accept_link(&h.ctx, page, "/file.pdf"), None);
    }
}
