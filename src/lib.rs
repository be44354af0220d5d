pub mod backoff;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod indexer;
pub mod logging;
pub mod models;
pub mod morphology;
pub mod network;
pub mod orchestration;
pub mod parser;
pub mod run_controller;
pub mod search;
pub mod snippet;
pub mod store;
pub mod url_utils;

// Re-export main types for library usage
pub use config::{AppConfig, SiteConfig};
pub use crawler::{crawl_site, CrawlContext, CrawlError, SiteCrawlReport};
pub use indexer::{Indexer, LemmaLocks, MergeStats};
pub use models::{IndexEntry, Lemma, LemmaFrequencies, Page, PageUrl, Site, SiteStatus};
pub use morphology::Morphology;
pub use network::{FetchError, FetchedPage, Fetcher, HttpClient, StaticFetcher};
pub use run_controller::{IndexingError, RunController, RunReport, RunState, Statistics};
pub use search::{QueryEngine, SearchError, SearchHit, SearchResults};
pub use store::{MemoryStore, PostingStore, RedbStore, StoreError};
