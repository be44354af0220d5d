use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::HashMap;

pub type SiteId = u64;
pub type PageId = u64;
pub type LemmaId = u64;
pub type IndexId = u64;

/// Lemma text -> number of occurrences within one document
pub type LemmaFrequencies = HashMap<String, u32>;

/// Current UNIX time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lifecycle of a site within an indexing run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SiteStatus::Indexing => "INDEXING",
            SiteStatus::Indexed => "INDEXED",
            SiteStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A configured site root and the state of its last run
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Site {
    pub id: SiteId,
    /// Scheme + host root, e.g. `https://example.test`
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    /// UNIX seconds of the last status change
    pub status_time: u64,
    pub last_error: Option<String>,
}

/// A fetched page; `path` is relative to the site root and unique per site
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    pub path: String,
    pub code: u16,
    /// Visible text of the page
    pub content: String,
    pub title: Option<String>,
}

/// Page data before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewPage {
    pub site_id: SiteId,
    pub path: String,
    pub code: u16,
    pub content: String,
    pub title: Option<String>,
}

/// Normalized word of one site; `frequency` counts distinct pages containing it
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub text: String,
    pub frequency: u32,
}

/// Posting entry: `rank` is the number of occurrences of the lemma on the page
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct IndexEntry {
    pub id: IndexId,
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    pub rank: u32,
}

/// Node of one crawl tree.
///
/// Ownership only flows from parent to children; `parent` is the parent's
/// absolute URL and exists for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct PageUrl {
    pub absolute_url: String,
    /// Path relative to the site root, used as the dedup key
    pub path: String,
    /// Site root (`scheme://host[:port]`)
    pub head_url: String,
    pub parent: Option<String>,
    pub content: String,
    pub status: u16,
    pub children: Vec<PageUrl>,
}

impl PageUrl {
    /// Root node of a site's crawl tree
    pub fn root(head_url: &str) -> Self {
        Self {
            absolute_url: format!("{}/", head_url.trim_end_matches('/')),
            path: "/".to_string(),
            head_url: head_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Child node discovered on this page
    pub fn child(&self, absolute_url: String, path: String) -> Self {
        Self {
            absolute_url,
            path,
            head_url: self.head_url.clone(),
            parent: Some(self.absolute_url.clone()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_page_url() {
        let root = PageUrl::root("https://example.test/");
        assert_eq!(root.absolute_url, "https://example.test/");
        assert_eq!(root.head_url, "https://example.test");
        assert_eq!(root.path, "/");
        assert!(root.parent.is_none());
    }

    #[test]
    fn test_child_carries_parent_url() {
        let root = PageUrl::root("https://example.test");
        let child = root.child("https://example.test/a".to_string(), "/a".to_string());
        assert_eq!(child.parent.as_deref(), Some("https://example.test/"));
        assert_eq!(child.head_url, "https://example.test");
        assert!(child.children.is_empty());
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&SiteStatus::Indexed).unwrap();
        assert_eq!(json, "\"INDEXED\"");
        assert_eq!(SiteStatus::Failed.to_string(), "FAILED");
    }
}
