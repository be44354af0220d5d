//! URL helpers shared by the crawler, the single-page indexer and the CLI.

use url::Url;

/// File types that never carry indexable HTML
const DISALLOWED_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".ico", ".bmp", ".tif", ".tiff",
    ".css", ".js", ".json", ".xml", ".sql", ".zip", ".mp4", ".avi", ".mov", ".mp3", ".wav",
    ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".tar", ".gz", ".tgz", ".bz2", ".7z",
    ".rar", ".exe", ".msi", ".dmg", ".iso", ".apk", ".woff", ".woff2", ".ttf", ".eot",
];

/// `scheme://host[:port]` of a URL, the form site roots are stored in
pub fn site_root(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Same scheme, host and port
pub fn is_same_origin(url: &str, root: &str) -> bool {
    match (Url::parse(url), Url::parse(root)) {
        (Ok(a), Ok(b)) => a.origin().is_tuple() && a.origin() == b.origin(),
        _ => false,
    }
}

pub fn convert_to_absolute_url(link: &str, base_url: &str) -> Result<String, String> {
    let base = Url::parse(base_url).map_err(|e| e.to_string())?;
    let absolute_url = base.join(link).map_err(|e| e.to_string())?;
    Ok(absolute_url.to_string())
}

/// Dedup key of a page within its site: path plus query, fragment dropped,
/// trailing slash removed except for the root itself.
pub fn page_path(url: &Url) -> String {
    let path = url.path();
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    let path = if path.is_empty() { "/" } else { path };

    match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    }
}

/// Parse `url` and return its page path
pub fn page_path_of(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| page_path(&u))
}

/// Filter URLs: HTTP(S) only, skip binaries/assets and any configured marker.
pub fn should_crawl_url(url: &str, skip_patterns: &[String]) -> bool {
    let parsed_url = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if !matches!(parsed_url.scheme(), "http" | "https") {
        return false;
    }

    let path = parsed_url.path().to_lowercase();
    if DISALLOWED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    if let Some(query) = parsed_url.query() {
        let query_lower = query.to_ascii_lowercase();
        if query_lower.contains("download") || query_lower.contains("attachment") {
            return false;
        }
    }

    let lower = url.to_lowercase();
    !skip_patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && lower.contains(&pattern.to_lowercase()))
}

/// Add https:// prefix for bare domains (CLI convenience).
pub fn normalize_url_for_cli(url: &str) -> String {
    let trimmed = url.trim();

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    format!("https://{}", trimmed)
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("text/html") || lower.starts_with("application/xhtml+xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_root() {
        assert_eq!(
            site_root("https://example.test/a/b"),
            Some("https://example.test".to_string())
        );
        assert_eq!(
            site_root("http://example.test:8080/"),
            Some("http://example.test:8080".to_string())
        );
        assert_eq!(site_root("ftp://example.test/"), None);
        assert_eq!(site_root("garbage"), None);
    }

    #[test]
    fn test_same_origin() {
        let root = "https://example.test/";
        assert!(is_same_origin("https://example.test/a", root));
        assert!(is_same_origin("https://example.test:443/a", root));
        assert!(!is_same_origin("http://example.test/a", root));
        assert!(!is_same_origin("https://www.example.test/a", root));
        assert!(!is_same_origin("https://example.test:8443/a", root));
        assert!(!is_same_origin("https://other.test/", root));
    }

    #[test]
    fn test_convert_to_absolute_url() {
        let base = "https://example.test/dir/page";
        assert_eq!(
            convert_to_absolute_url("/about", base).unwrap(),
            "https://example.test/about"
        );
        assert_eq!(
            convert_to_absolute_url("next", base).unwrap(),
            "https://example.test/dir/next"
        );
        assert_eq!(
            convert_to_absolute_url("../up", base).unwrap(),
            "https://example.test/up"
        );
        assert!(convert_to_absolute_url("/a", "not a url").is_err());
    }

    #[test]
    fn test_page_path() {
        assert_eq!(page_path_of("https://example.test").unwrap(), "/");
        assert_eq!(page_path_of("https://example.test/").unwrap(), "/");
        assert_eq!(page_path_of("https://example.test/a/").unwrap(), "/a");
        assert_eq!(page_path_of("https://example.test/a#top").unwrap(), "/a");
        assert_eq!(page_path_of("https://example.test/a?p=2").unwrap(), "/a?p=2");
        assert_eq!(page_path_of("https://example.test/a?").unwrap(), "/a");
    }

    #[test]
    fn test_should_crawl_url() {
        let skip = vec!["instagram".to_string(), "tilda/click".to_string()];
        assert!(should_crawl_url("https://example.test/page", &skip));
        assert!(!should_crawl_url("https://example.test/image.JPG", &skip));
        assert!(!should_crawl_url("https://example.test/dump.sql", &skip));
        assert!(!should_crawl_url("https://example.test/file?download=1", &skip));
        assert!(!should_crawl_url("https://example.test/go/instagram", &skip));
        assert!(!should_crawl_url("https://example.test/tilda/click", &skip));
        assert!(should_crawl_url("https://example.test/clickhouse", &skip));
        assert!(!should_crawl_url("ftp://example.test/", &skip));
        assert!(should_crawl_url("https://example.test/instagram", &[]));
    }

    #[test]
    fn test_normalize_url_for_cli() {
        assert_eq!(normalize_url_for_cli("example.test"), "https://example.test");
        assert_eq!(
            normalize_url_for_cli(" http://example.test/a "),
            "http://example.test/a"
        );
    }

    #[test]
    fn test_is_html_content_type() {
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("image/png"));
    }
}
