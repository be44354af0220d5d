use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

lazy_static! {
    static ref LINK_SELECTOR: Selector = Selector::parse("a[href]").expect("Invalid CSS selector");
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").expect("Invalid CSS selector");
    static ref H1_SELECTOR: Selector = Selector::parse("h1").expect("Invalid CSS selector");
    static ref BODY_SELECTOR: Selector = Selector::parse("body").expect("Invalid CSS selector");
    static ref MARKUP_TAG: Regex = Regex::new(r"<[a-zA-Z!/][^>]*>").expect("Invalid markup pattern");
}

/// Elements whose text is never shown to a reader
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Visible text of an HTML document, whitespace collapsed
pub fn extract_text(html_body: &str) -> String {
    let document = Html::parse_document(html_body);
    text_of(&document)
}

/// Whether the input carries HTML tags rather than plain text
pub fn looks_like_markup(text: &str) -> bool {
    MARKUP_TAG.is_match(text)
}

/// Links, text and title from a single parse of the document
///
/// # Examples
/// ```
/// use search_engine::parser::parse_document;
///
/// let html = r#"<html><body><a href="https://example.com">Link</a></body></html>"#;
/// let parsed = parse_document(html);
/// assert_eq!(parsed.links, vec!["https://example.com"]);
/// ```
pub struct ParsedDocument {
    pub text: String,
    pub title: Option<String>,
    pub links: Vec<String>,
}

pub fn parse_document(html_body: &str) -> ParsedDocument {
    let document = Html::parse_document(html_body);
    ParsedDocument {
        text: text_of(&document),
        title: title_of(&document),
        links: links_of(&document),
    }
}

fn links_of(document: &Html) -> Vec<String> {
    let mut links = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            let cleaned_href = href.trim();

            // Skip empty links, javascript links, mailto, tel, etc.
            if !cleaned_href.is_empty()
                && !cleaned_href.starts_with('#')
                && !cleaned_href.starts_with("javascript:")
                && !cleaned_href.starts_with("mailto:")
                && !cleaned_href.starts_with("tel:")
                && !cleaned_href.starts_with("data:")
                && !cleaned_href.starts_with("file:")
            {
                links.push(cleaned_href.to_string());
            }
        }
    }

    links
}

fn text_of(document: &Html) -> String {
    let root = document
        .select(&BODY_SELECTOR)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut pieces: Vec<&str> = Vec::new();
    for node in root.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| HIDDEN_ELEMENTS.contains(&el.name()))
                    .unwrap_or(false)
            });
            if !hidden {
                pieces.push(text);
            }
        }
    }

    collapse_whitespace(&pieces.join(" "))
}

fn title_of(document: &Html) -> Option<String> {
    let from = |element: Option<ElementRef>| {
        element
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| !t.is_empty())
    };

    from(document.select(&TITLE_SELECTOR).next()).or_else(|| from(document.select(&H1_SELECTOR).next()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
