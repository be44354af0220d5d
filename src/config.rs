//! Configuration: tunable constants plus the operator's `search_engine.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::url_utils;

// Global configuration constants - single source of truth

pub struct Config;

impl Config {
    // HTTP/Network config
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
    pub const MAX_RETRIES: u32 = 2;
    pub const RETRY_BACKOFF_MS: u64 = 500;
    pub const RETRY_BACKOFF_MAX_MS: u64 = 4_000;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const POOL_IDLE_PER_HOST: usize = 16;
    pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;
    pub const MAX_REDIRECTS: usize = 5;

    // Indexing
    pub const LEMMA_LOCK_SHARDS: usize = 64;
    pub const STOPPED_BY_USER: &'static str = "Indexing stopped by user";
    pub const ROOT_UNREACHABLE: &'static str = "Site root page is unavailable";

    // Titles built from content when a page has none
    pub const FALLBACK_TITLE_WORDS: usize = 8;
}

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "search_engine.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid site url '{0}'")]
    InvalidSite(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// One configured site root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlerSettings {
    pub max_workers: usize,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub referrer: String,
    pub max_content_size: usize,
    /// URL substrings that exclude a link from crawling
    pub skip_patterns: Vec<String>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_workers: cores + 1,
            request_delay_ms: 300,
            timeout_secs: 20,
            user_agent: "HeliontSearchBot/1.0".to_string(),
            referrer: "http://www.google.com".to_string(),
            max_content_size: Config::MAX_CONTENT_SIZE,
            skip_patterns: vec![
                "instagram".to_string(),
                "tilda/click".to_string(),
                "utm_".to_string(),
                "share=".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    /// Lemmas on more than this share of a site's pages are ignored in
    /// multi-word queries
    pub popular_lemma_percent: u32,
    pub default_limit: usize,
    pub snippet_radius: usize,
    pub snippet_max_chars: usize,
    pub snippet_cut_chars: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            popular_lemma_percent: 80,
            default_limit: 20,
            snippet_radius: 20,
            snippet_max_chars: 240,
            snippet_cut_chars: 270,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Redb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Redb,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageSettings {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("index.redb")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Absent: no existence cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "lemmaCache".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MorphologySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub russian_dictionary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub english_dictionary: Option<PathBuf>,
}

/// Everything read from `search_engine.toml`.
///
/// # Example
///
/// ```toml
/// [[sites]]
/// url = "https://example.test"
/// name = "Example"
///
/// [crawler]
/// max_workers = 8
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub sites: Vec<SiteConfig>,
    pub crawler: CrawlerSettings,
    pub search: SearchSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub morphology: MorphologySettings,
}

impl AppConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AppConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.normalize()?;
        Ok(config)
    }

    /// Parse config text without touching the filesystem
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig =
            toml::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.normalize()?;
        Ok(config)
    }

    /// Site urls are stored as `scheme://host[:port]`; limits must be usable.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        for site in &mut self.sites {
            site.url = url_utils::site_root(site.url.trim())
                .ok_or_else(|| ConfigError::InvalidSite(site.url.clone()))?;
            if site.name.trim().is_empty() {
                site.name = site.url.clone();
            }
        }

        if self.crawler.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "crawler.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.search.popular_lemma_percent > 100 {
            return Err(ConfigError::Invalid {
                field: "search.popular_lemma_percent",
                reason: "must be between 0 and 100".to_string(),
            });
        }
        if self.search.snippet_cut_chars < self.search.snippet_max_chars {
            return Err(ConfigError::Invalid {
                field: "search.snippet_cut_chars",
                reason: "must not be smaller than snippet_max_chars".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Search engine configuration

# Sites to crawl. Only links with the same scheme, host and port are followed.
# [[sites]]
# url = "https://example.test"
# name = "Example"

[crawler]
# max_workers = 9                 # default: CPU cores + 1
request_delay_ms = 300
timeout_secs = 20
user_agent = "HeliontSearchBot/1.0"
referrer = "http://www.google.com"
max_content_size = 10485760
skip_patterns = ["instagram", "tilda/click", "utm_", "share="]

[search]
popular_lemma_percent = 80
default_limit = 20
snippet_radius = 20
snippet_max_chars = 240
snippet_cut_chars = 270

[storage]
# "redb" (durable, default) or "memory"
backend = "redb"
data_dir = "./data"

[cache]
# redis_url = "redis://127.0.0.1:6379"
key_prefix = "lemmaCache"

[morphology]
# One reading per line: "form normal TAG"
# russian_dictionary = "./dict/ru.txt"
# english_dictionary = "./dict/en.txt"
"#
    }

    /// Write the default config, refusing to overwrite an existing file.
    pub fn write_default(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }

    /// Configured site whose root shares scheme, host and port with `url`
    pub fn site_for_url(&self, url: &str) -> Option<&SiteConfig> {
        self.sites
            .iter()
            .find(|site| url_utils::is_same_origin(url, &site.url))
    }
}
