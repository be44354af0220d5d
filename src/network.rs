use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::backoff::ExponentialBackoff;
use crate::config::{Config, CrawlerSettings};
use crate::parser;
use crate::url_utils::is_html_content_type;

/// A fetched HTML page reduced to what indexing needs
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub status: u16,
    /// Visible text of the page
    pub text: String,
    pub title: Option<String>,
    /// Raw `href` values of the page's anchors
    pub links: Vec<String>,
}

impl FetchedPage {
    /// Parse an HTML body into a page
    pub fn from_html(status: u16, html: &str) -> Self {
        let parsed = parser::parse_document(html);
        Self {
            status,
            text: parsed.text,
            title: parsed.title,
            links: parsed.links,
        }
    }
}

/// Source of pages for the crawler and the single-page indexer
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// HTTP client for making web requests
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    user_agent: String,
    referrer: String,
    max_content_size: usize,
    backoff: ExponentialBackoff,
}

impl HttpClient {
    /// Create a client with the crawler's identity and limits
    pub fn new(settings: &CrawlerSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(Config::POOL_IDLE_TIMEOUT_SECS))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(Config::MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(settings.timeout_secs),
            user_agent: settings.user_agent.clone(),
            referrer: settings.referrer.clone(),
            max_content_size: settings.max_content_size,
            backoff: ExponentialBackoff::default(),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Fetch a URL and return the response body as a string.
    /// Transient errors are retried with exponential backoff.
    pub async fn fetch_html(&self, url: &str) -> Result<(u16, String), FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < Config::MAX_RETRIES => {
                    let wait = self.backoff.delay(attempt);
                    debug!("Retrying {} in {:?} after: {}", url, wait, e);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<(u16, String), FetchError> {
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(url)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5",
                )
                .header("Accept-Language", "ru,en;q=0.8")
                .header("Referer", &self.referrer)
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(Self::classify_error)?;

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(status_code));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());
        if let Some(ct) = content_type {
            if !is_html_content_type(&ct) {
                return Err(FetchError::UnsupportedContent(ct));
            }
        }

        if let Some(length) = response.content_length() {
            let length = length as usize;
            if length > self.max_content_size {
                return Err(FetchError::ContentTooLarge(length, self.max_content_size));
            }
        }

        let content = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::BodyError(e.to_string()))?;

        if content.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(
                content.len(),
                self.max_content_size,
            ));
        }

        Ok((status_code, content))
    }

    /// Classify reqwest errors into our FetchError types
    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        if error.is_builder() {
            return FetchError::InvalidUrl(error.to_string());
        }

        let error_msg = error.to_string().to_lowercase();
        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if error_msg.contains("dns") || error_msg.contains("name resolution") {
            return FetchError::DnsError;
        }
        if error_msg.contains("ssl") || error_msg.contains("tls") || error_msg.contains("certificate") {
            return FetchError::SslError;
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let (status, html) = self.fetch_html(url).await?;
        // HTML parsing is CPU bound; keep it off the reactor
        tokio::task::spawn_blocking(move || FetchedPage::from_html(status, &html))
            .await
            .map_err(|e| FetchError::BodyError(e.to_string()))
    }
}

/// Fetcher over a fixed set of HTML documents keyed by absolute URL.
///
/// Used for offline indexing of captured sites and as the fixture fetcher in
/// tests. Unknown URLs answer 404.
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    delay: Duration,
    hanging: HashSet<String>,
    requests: Arc<DashMap<String, usize>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Wait this long before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests for this URL never complete
    pub fn with_hanging(mut self, url: &str) -> Self {
        self.hanging.insert(url.to_string());
        self
    }

    /// How many times `url` was requested
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.get(url).map(|c| *c).unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.requests.iter().map(|c| *c.value()).sum()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        *self.requests.entry(url.to_string()).or_insert(0) += 1;

        if self.hanging.contains(url) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.pages.get(url) {
            Some(html) => Ok(FetchedPage::from_html(200, html)),
            None => Err(FetchError::HttpStatus(404)),
        }
    }
}

/// Errors that can occur during HTTP fetching
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error - certificate or encryption issue")]
    SslError,

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),
}

impl FetchError {
    /// Check if this error is retryable (transient) or permanent
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::HttpStatus(code) => *code == 429 || (500..600).contains(code),
            FetchError::NetworkError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("broken pipe")
                    || msg_lower.contains("connection reset")
                    || msg_lower.contains("temporary")
            }
            FetchError::ClientBuild(_)
            | FetchError::InvalidUrl(_)
            | FetchError::ConnectionRefused
            | FetchError::DnsError
            | FetchError::SslError
            | FetchError::UnsupportedContent(_)
            | FetchError::BodyError(_)
            | FetchError::ContentTooLarge(_, _) => false,
        }
    }
}
