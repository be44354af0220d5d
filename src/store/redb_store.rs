use redb::{
    Database, Durability, MultimapTableDefinition, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, TableDefinition, WriteTransaction,
};
use rkyv::de::deserializers::SharedDeserializeMap;
use rkyv::AlignedVec;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::{PageMerge, PageRemoval, PostingStore, StoreError};
use crate::models::{
    unix_now, IndexEntry, IndexId, Lemma, LemmaId, NewPage, Page, PageId, Site, SiteId,
    SiteStatus,
};

type RecordTable = TableDefinition<'static, u64, &'static [u8]>;
type KeyTable = TableDefinition<'static, &'static str, u64>;
type RelationTable = MultimapTableDefinition<'static, u64, u64>;

fn encode<T>(value: &T) -> Result<AlignedVec, StoreError>
where
    T: rkyv::Serialize<rkyv::ser::serializers::AllocSerializer<2048>>,
{
    rkyv::to_bytes::<_, 2048>(value)
        .map_err(|e| StoreError::Serialization(format!("Serialize failed: {}", e)))
}

fn decode<T>(bytes: &[u8]) -> Result<T, StoreError>
where
    T: rkyv::Archive,
    T::Archived: rkyv::Deserialize<T, SharedDeserializeMap>,
{
    let mut aligned = AlignedVec::new();
    aligned.extend_from_slice(bytes);
    // Bytes were produced by `encode` for the same type
    unsafe { rkyv::from_bytes_unchecked(&aligned) }
        .map_err(|e| StoreError::Serialization(format!("Deserialize failed: {}", e)))
}

/// Composite unique key; NUL never appears in paths or lemma texts
fn scoped_key(site_id: SiteId, name: &str) -> String {
    format!("{}\0{}", site_id, name)
}

/// Durable posting store on redb with rkyv-encoded records.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    // Records
    const SITES: RecordTable = TableDefinition::new("sites");
    const PAGES: RecordTable = TableDefinition::new("pages");
    const LEMMAS: RecordTable = TableDefinition::new("lemmas");
    const INDEXES: RecordTable = TableDefinition::new("indexes");

    // Unique keys
    const SITE_URLS: KeyTable = TableDefinition::new("site_urls");
    const PAGE_PATHS: KeyTable = TableDefinition::new("page_paths");
    const LEMMA_KEYS: KeyTable = TableDefinition::new("lemma_keys");

    // Secondary indexes
    const SITE_PAGES: RelationTable = MultimapTableDefinition::new("site_pages");
    const SITE_LEMMAS: RelationTable = MultimapTableDefinition::new("site_lemmas");
    const LEMMA_INDEXES: RelationTable = MultimapTableDefinition::new("lemma_indexes");
    const PAGE_INDEXES: RelationTable = MultimapTableDefinition::new("page_indexes");

    // Id counters
    const METADATA: KeyTable = TableDefinition::new("metadata");
    const NEXT_ID: &'static str = "next_id";

    /// Open (or create) `index.redb` inside `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let data_path = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_path)?;
        Self::open_file(data_path.join("index.redb"))
    }

    pub fn open_file<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db = Database::create(db_path.as_ref())?;

        // Open each table so the database creates them before use.
        let write_txn = db.begin_write()?;
        {
            let _sites = write_txn.open_table(Self::SITES)?;
            let _pages = write_txn.open_table(Self::PAGES)?;
            let _lemmas = write_txn.open_table(Self::LEMMAS)?;
            let _indexes = write_txn.open_table(Self::INDEXES)?;
            let _site_urls = write_txn.open_table(Self::SITE_URLS)?;
            let _page_paths = write_txn.open_table(Self::PAGE_PATHS)?;
            let _lemma_keys = write_txn.open_table(Self::LEMMA_KEYS)?;
            let _site_pages = write_txn.open_multimap_table(Self::SITE_PAGES)?;
            let _site_lemmas = write_txn.open_multimap_table(Self::SITE_LEMMAS)?;
            let _lemma_indexes = write_txn.open_multimap_table(Self::LEMMA_INDEXES)?;
            let _page_indexes = write_txn.open_multimap_table(Self::PAGE_INDEXES)?;
            let _metadata = write_txn.open_table(Self::METADATA)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Per-page writes are frequent; they are flushed by the next durable commit.
    fn begin_write(&self) -> Result<WriteTransaction, StoreError> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Eventual);
        Ok(txn)
    }

    /// Site status changes are the checkpoints of a run and are committed durably.
    fn begin_durable_write(&self) -> Result<WriteTransaction, StoreError> {
        Ok(self.db.begin_write()?)
    }

    fn next_id_in_txn(txn: &WriteTransaction) -> Result<u64, StoreError> {
        let mut table = txn.open_table(Self::METADATA)?;
        let next = table.get(Self::NEXT_ID)?.map(|v| v.value()).unwrap_or(0) + 1;
        table.insert(Self::NEXT_ID, next)?;
        Ok(next)
    }

    fn read_record<T>(&self, table: RecordTable, id: u64) -> Result<Option<T>, StoreError>
    where
        T: rkyv::Archive,
        T::Archived: rkyv::Deserialize<T, SharedDeserializeMap>,
    {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn lookup_key(&self, table: KeyTable, key: &str) -> Result<Option<u64>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        Ok(table.get(key)?.map(|v| v.value()))
    }

    fn multimap_values(
        &self,
        table: RelationTable,
        key: u64,
    ) -> Result<Vec<u64>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(table)?;
        let mut values = Vec::new();
        for value in table.get(key)? {
            values.push(value?.value());
        }
        Ok(values)
    }

    fn index_rows(&self, ids: &[IndexId]) -> Result<Vec<IndexEntry>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::INDEXES)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = table.get(*id)? {
                rows.push(decode(bytes.value())?);
            }
        }
        Ok(rows)
    }

    /// Remove index rows and their secondary entries inside `txn`
    fn remove_index_rows_in_txn(
        txn: &WriteTransaction,
        ids: &[IndexId],
    ) -> Result<Vec<IndexEntry>, StoreError> {
        let mut indexes = txn.open_table(Self::INDEXES)?;
        let mut lemma_indexes = txn.open_multimap_table(Self::LEMMA_INDEXES)?;
        let mut page_indexes = txn.open_multimap_table(Self::PAGE_INDEXES)?;

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let entry: Option<IndexEntry> = match indexes.remove(*id)? {
                Some(bytes) => Some(decode(bytes.value())?),
                None => None,
            };
            if let Some(entry) = entry {
                lemma_indexes.remove(entry.lemma_id, entry.id)?;
                page_indexes.remove(entry.page_id, entry.id)?;
                removed.push(entry);
            }
        }
        Ok(removed)
    }

    fn values_in_txn(
        txn: &WriteTransaction,
        table: RelationTable,
        key: u64,
    ) -> Result<Vec<u64>, StoreError> {
        let table = txn.open_multimap_table(table)?;
        let mut values = Vec::new();
        for value in table.get(key)? {
            values.push(value?.value());
        }
        Ok(values)
    }
}

impl PostingStore for RedbStore {
    fn insert_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site, StoreError> {
        let write_txn = self.begin_durable_write()?;
        let site = {
            let mut site_urls = write_txn.open_table(Self::SITE_URLS)?;
            if site_urls.get(url)?.is_some() {
                return Err(StoreError::Duplicate {
                    entity: "site",
                    key: url.to_string(),
                });
            }

            let site = Site {
                id: Self::next_id_in_txn(&write_txn)?,
                url: url.to_string(),
                name: name.to_string(),
                status,
                status_time: unix_now(),
                last_error: None,
            };
            let serialized = encode(&site)?;
            write_txn.open_table(Self::SITES)?.insert(site.id, serialized.as_ref())?;
            site_urls.insert(url, site.id)?;
            site
        };
        write_txn.commit()?;
        Ok(site)
    }

    fn find_site(&self, id: SiteId) -> Result<Option<Site>, StoreError> {
        self.read_record(Self::SITES, id)
    }

    fn find_site_by_url(&self, url: &str) -> Result<Option<Site>, StoreError> {
        match self.lookup_key(Self::SITE_URLS, url)? {
            Some(id) => self.find_site(id),
            None => Ok(None),
        }
    }

    fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::SITES)?;
        let mut sites = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            sites.push(decode(value.value())?);
        }
        Ok(sites)
    }

    fn update_site_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let write_txn = self.begin_durable_write()?;
        {
            let mut table = write_txn.open_table(Self::SITES)?;

            // Drop the borrow of the stored bytes before writing back.
            let existing: Option<Site> = match table.get(id)? {
                Some(bytes) => Some(decode(bytes.value())?),
                None => None,
            };
            let mut site = existing.ok_or(StoreError::NotFound { entity: "site", id })?;
            site.status = status;
            site.status_time = unix_now();
            site.last_error = last_error;

            let serialized = encode(&site)?;
            table.insert(id, serialized.as_ref())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_site_by_url(&self, url: &str) -> Result<bool, StoreError> {
        let write_txn = self.begin_durable_write()?;
        {
            let site_id = match write_txn.open_table(Self::SITE_URLS)?.remove(url)? {
                Some(id) => id.value(),
                None => return Ok(false),
            };
            write_txn.open_table(Self::SITES)?.remove(site_id)?;

            let page_ids = Self::values_in_txn(&write_txn, Self::SITE_PAGES, site_id)?;
            let mut index_ids = Vec::new();
            {
                let mut pages = write_txn.open_table(Self::PAGES)?;
                let mut page_paths = write_txn.open_table(Self::PAGE_PATHS)?;
                let page_indexes = write_txn.open_multimap_table(Self::PAGE_INDEXES)?;
                for page_id in &page_ids {
                    let page: Option<Page> = match pages.remove(*page_id)? {
                        Some(bytes) => Some(decode(bytes.value())?),
                        None => None,
                    };
                    if let Some(page) = page {
                        page_paths.remove(scoped_key(site_id, &page.path).as_str())?;
                    }
                    for value in page_indexes.get(*page_id)? {
                        index_ids.push(value?.value());
                    }
                }
            }
            Self::remove_index_rows_in_txn(&write_txn, &index_ids)?;

            let lemma_ids = Self::values_in_txn(&write_txn, Self::SITE_LEMMAS, site_id)?;
            {
                let mut lemmas = write_txn.open_table(Self::LEMMAS)?;
                let mut lemma_keys = write_txn.open_table(Self::LEMMA_KEYS)?;
                for lemma_id in &lemma_ids {
                    let lemma: Option<Lemma> = match lemmas.remove(*lemma_id)? {
                        Some(bytes) => Some(decode(bytes.value())?),
                        None => None,
                    };
                    if let Some(lemma) = lemma {
                        lemma_keys.remove(scoped_key(site_id, &lemma.text).as_str())?;
                    }
                }
            }

            write_txn.open_multimap_table(Self::SITE_PAGES)?.remove_all(site_id)?;
            write_txn.open_multimap_table(Self::SITE_LEMMAS)?.remove_all(site_id)?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    fn insert_page(&self, page: NewPage) -> Result<Option<Page>, StoreError> {
        let key = scoped_key(page.site_id, &page.path);
        let write_txn = self.begin_write()?;
        let page = {
            let mut page_paths = write_txn.open_table(Self::PAGE_PATHS)?;
            if page_paths.get(key.as_str())?.is_some() {
                return Ok(None);
            }

            let page = Page {
                id: Self::next_id_in_txn(&write_txn)?,
                site_id: page.site_id,
                path: page.path,
                code: page.code,
                content: page.content,
                title: page.title,
            };
            let serialized = encode(&page)?;
            write_txn.open_table(Self::PAGES)?.insert(page.id, serialized.as_ref())?;
            write_txn
                .open_multimap_table(Self::SITE_PAGES)?
                .insert(page.site_id, page.id)?;
            page_paths.insert(key.as_str(), page.id)?;
            page
        };
        write_txn.commit()?;
        Ok(Some(page))
    }

    fn find_page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        self.read_record(Self::PAGES, id)
    }

    fn find_page_by_path(&self, site_id: SiteId, path: &str) -> Result<Option<Page>, StoreError> {
        match self.lookup_key(Self::PAGE_PATHS, &scoped_key(site_id, path))? {
            Some(id) => self.find_page(id),
            None => Ok(None),
        }
    }

    fn count_pages(&self, site_id: Option<SiteId>) -> Result<u64, StoreError> {
        match site_id {
            Some(site_id) => Ok(self.multimap_values(Self::SITE_PAGES, site_id)?.len() as u64),
            None => {
                let read_txn = self.db.begin_read()?;
                let table = read_txn.open_table(Self::PAGES)?;
                Ok(table.len()?)
            }
        }
    }

    fn find_lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>, StoreError> {
        match self.lookup_key(Self::LEMMA_KEYS, &scoped_key(site_id, text))? {
            Some(id) => self.find_lemma_by_id(id),
            None => Ok(None),
        }
    }

    fn find_lemma_by_id(&self, id: LemmaId) -> Result<Option<Lemma>, StoreError> {
        self.read_record(Self::LEMMAS, id)
    }

    fn count_lemmas(&self, site_id: Option<SiteId>) -> Result<u64, StoreError> {
        match site_id {
            Some(site_id) => Ok(self.multimap_values(Self::SITE_LEMMAS, site_id)?.len() as u64),
            None => {
                let read_txn = self.db.begin_read()?;
                let table = read_txn.open_table(Self::LEMMAS)?;
                Ok(table.len()?)
            }
        }
    }

    fn merge_page(
        &self,
        site_id: SiteId,
        page_id: PageId,
        lemmas: &[(String, u32)],
    ) -> Result<PageMerge, StoreError> {
        if lemmas.is_empty() {
            return Ok(PageMerge::default());
        }

        let write_txn = self.begin_write()?;
        let mut merge = PageMerge::default();
        {
            let mut lemma_keys = write_txn.open_table(Self::LEMMA_KEYS)?;
            let mut lemma_rows = write_txn.open_table(Self::LEMMAS)?;
            let mut site_lemmas = write_txn.open_multimap_table(Self::SITE_LEMMAS)?;
            let mut indexes = write_txn.open_table(Self::INDEXES)?;
            let mut lemma_indexes = write_txn.open_multimap_table(Self::LEMMA_INDEXES)?;
            let mut page_indexes = write_txn.open_multimap_table(Self::PAGE_INDEXES)?;

            for (text, rank) in lemmas {
                let key = scoped_key(site_id, text);
                let existing = lemma_keys.get(key.as_str())?.map(|id| id.value());
                let lemma = match existing {
                    Some(id) => {
                        let stored: Option<Lemma> = match lemma_rows.get(id)? {
                            Some(bytes) => Some(decode(bytes.value())?),
                            None => None,
                        };
                        let mut lemma = stored.ok_or(StoreError::NotFound { entity: "lemma", id })?;
                        lemma.frequency = lemma.frequency.saturating_add(1);
                        lemma
                    }
                    None => {
                        let lemma = Lemma {
                            id: Self::next_id_in_txn(&write_txn)?,
                            site_id,
                            text: text.clone(),
                            frequency: 1,
                        };
                        lemma_keys.insert(key.as_str(), lemma.id)?;
                        site_lemmas.insert(site_id, lemma.id)?;
                        merge.created.push(text.clone());
                        lemma
                    }
                };
                let serialized = encode(&lemma)?;
                lemma_rows.insert(lemma.id, serialized.as_ref())?;

                let entry = IndexEntry {
                    id: Self::next_id_in_txn(&write_txn)?,
                    page_id,
                    lemma_id: lemma.id,
                    rank: *rank,
                };
                let serialized = encode(&entry)?;
                indexes.insert(entry.id, serialized.as_ref())?;
                lemma_indexes.insert(entry.lemma_id, entry.id)?;
                page_indexes.insert(page_id, entry.id)?;
                merge.rows.push(entry);
            }
        }
        write_txn.commit()?;
        Ok(merge)
    }

    fn remove_page(&self, page_id: PageId) -> Result<PageRemoval, StoreError> {
        let write_txn = self.begin_write()?;
        let removal = {
            let page: Option<Page> = match write_txn.open_table(Self::PAGES)?.remove(page_id)? {
                Some(bytes) => Some(decode(bytes.value())?),
                None => None,
            };
            if let Some(page) = &page {
                write_txn
                    .open_table(Self::PAGE_PATHS)?
                    .remove(scoped_key(page.site_id, &page.path).as_str())?;
                write_txn
                    .open_multimap_table(Self::SITE_PAGES)?
                    .remove(page.site_id, page_id)?;
            }
            let index_ids = Self::values_in_txn(&write_txn, Self::PAGE_INDEXES, page_id)?;
            let rows = Self::remove_index_rows_in_txn(&write_txn, &index_ids)?;

            let mut lemma_rows = write_txn.open_table(Self::LEMMAS)?;
            let mut lemma_keys = write_txn.open_table(Self::LEMMA_KEYS)?;
            let mut site_lemmas = write_txn.open_multimap_table(Self::SITE_LEMMAS)?;
            let mut dropped = Vec::new();
            for entry in &rows {
                let stored: Option<Lemma> = match lemma_rows.get(entry.lemma_id)? {
                    Some(bytes) => Some(decode(bytes.value())?),
                    None => None,
                };
                let mut lemma = match stored {
                    Some(lemma) => lemma,
                    None => continue,
                };
                if lemma.frequency <= 1 {
                    lemma_rows.remove(lemma.id)?;
                    lemma_keys.remove(scoped_key(lemma.site_id, &lemma.text).as_str())?;
                    site_lemmas.remove(lemma.site_id, lemma.id)?;
                    dropped.push(lemma.text);
                } else {
                    lemma.frequency -= 1;
                    let serialized = encode(&lemma)?;
                    lemma_rows.insert(lemma.id, serialized.as_ref())?;
                }
            }
            PageRemoval { rows, dropped }
        };
        write_txn.commit()?;
        Ok(removal)
    }

    fn postings(&self, lemma_id: LemmaId) -> Result<Vec<IndexEntry>, StoreError> {
        let ids = self.multimap_values(Self::LEMMA_INDEXES, lemma_id)?;
        self.index_rows(&ids)
    }

    fn indexes_for_page(&self, page_id: PageId) -> Result<Vec<IndexEntry>, StoreError> {
        let ids = self.multimap_values(Self::PAGE_INDEXES, page_id)?;
        self.index_rows(&ids)
    }

    fn pages_by_index_ids(&self, ids: &[IndexId]) -> Result<Vec<Page>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let indexes = read_txn.open_table(Self::INDEXES)?;
        let pages = read_txn.open_table(Self::PAGES)?;

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for id in ids {
            let entry: IndexEntry = match indexes.get(*id)? {
                Some(bytes) => decode(bytes.value())?,
                None => continue,
            };
            if !seen.insert(entry.page_id) {
                continue;
            }
            if let Some(bytes) = pages.get(entry.page_id)? {
                found.push(decode(bytes.value())?);
            }
        }
        Ok(found)
    }
}
