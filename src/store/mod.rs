//! Posting store: sites, pages, lemmas and index rows.

pub mod memory;
pub mod redb_store;

use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    IndexEntry, IndexId, Lemma, LemmaId, NewPage, Page, PageId, Site, SiteId, SiteStatus,
};

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("Database creation error: {0}")]
    RedbCreate(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Rows written for one page by [`PostingStore::merge_page`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMerge {
    pub rows: Vec<IndexEntry>,
    /// Lemma texts whose row was created by this page
    pub created: Vec<String>,
}

/// Rows removed with one page by [`PostingStore::remove_page`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRemoval {
    pub rows: Vec<IndexEntry>,
    /// Lemma texts left on no page and deleted
    pub dropped: Vec<String>,
}

/// Run a store call on the blocking pool so storage I/O stays off the
/// async workers.
pub async fn blocking<T, F>(store: &Arc<dyn PostingStore>, call: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PostingStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref())).await?
}

/// Persistence contract for the indexer, crawler, query engine and run
/// controller.
///
/// Calls are synchronous and individually atomic. Callers serialize
/// `merge_page`/`remove_page` calls touching the same (site, lemma) pair.
pub trait PostingStore: Send + Sync {
    // Sites

    fn insert_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site, StoreError>;

    fn find_site(&self, id: SiteId) -> Result<Option<Site>, StoreError>;

    fn find_site_by_url(&self, url: &str) -> Result<Option<Site>, StoreError>;

    fn list_sites(&self) -> Result<Vec<Site>, StoreError>;

    /// Sets the status, stamps `status_time` and replaces `last_error`
    fn update_site_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Removes the site with all of its pages, lemmas and index rows
    fn delete_site_by_url(&self, url: &str) -> Result<bool, StoreError>;

    // Pages

    /// Saves the page unless its path is already taken within the site;
    /// `None` means the path existed and nothing was written.
    fn insert_page(&self, page: NewPage) -> Result<Option<Page>, StoreError>;

    fn find_page(&self, id: PageId) -> Result<Option<Page>, StoreError>;

    fn find_page_by_path(&self, site_id: SiteId, path: &str) -> Result<Option<Page>, StoreError>;

    fn count_pages(&self, site_id: Option<SiteId>) -> Result<u64, StoreError>;

    // Lemmas and index rows

    fn find_lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>, StoreError>;

    fn find_lemma_by_id(&self, id: LemmaId) -> Result<Option<Lemma>, StoreError>;

    fn count_lemmas(&self, site_id: Option<SiteId>) -> Result<u64, StoreError>;

    /// Add one page's lemma counts in a single step: every lemma's frequency
    /// grows by one (a missing lemma is created at 1) and one index row with
    /// the page-local count is written per lemma.
    fn merge_page(
        &self,
        site_id: SiteId,
        page_id: PageId,
        lemmas: &[(String, u32)],
    ) -> Result<PageMerge, StoreError>;

    /// Remove a page with its index rows in a single step, taking the page
    /// back out of its lemmas' frequencies. Lemmas left on no page are deleted.
    fn remove_page(&self, page_id: PageId) -> Result<PageRemoval, StoreError>;

    /// Index rows referencing the lemma
    fn postings(&self, lemma_id: LemmaId) -> Result<Vec<IndexEntry>, StoreError>;

    fn indexes_for_page(&self, page_id: PageId) -> Result<Vec<IndexEntry>, StoreError>;

    /// Distinct pages referenced by the given index rows, in first-seen order
    fn pages_by_index_ids(&self, ids: &[IndexId]) -> Result<Vec<Page>, StoreError>;
}
