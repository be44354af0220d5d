//! Highlighted page fragments for search results.

use regex::{Regex, RegexBuilder};

use crate::config::SearchSettings;

/// Window and cut limits, all in characters
#[derive(Debug, Clone, Copy)]
pub struct SnippetLimits {
    pub radius: usize,
    pub max_chars: usize,
    pub cut_chars: usize,
}

impl Default for SnippetLimits {
    fn default() -> Self {
        Self::from(&SearchSettings::default())
    }
}

impl From<&SearchSettings> for SnippetLimits {
    fn from(settings: &SearchSettings) -> Self {
        Self {
            radius: settings.snippet_radius,
            max_chars: settings.snippet_max_chars,
            cut_chars: settings.snippet_cut_chars,
        }
    }
}

/// Case-insensitive alternation of the terms, longest first so the widest
/// term wins where one is a prefix of another
fn terms_pattern(terms: &[String]) -> Option<Regex> {
    let mut terms: Vec<&str> = terms
        .iter()
        .map(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return None;
    }
    terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    terms.dedup();

    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Fragment of `content` from shortly before the first occurrence of any term
/// to shortly after the last one, widened to whole words, with every
/// occurrence wrapped in `<b>…</b>`. Empty when no term occurs.
pub fn build_snippet(content: &str, terms: &[String], limits: &SnippetLimits) -> String {
    let pattern = match terms_pattern(terms) {
        Some(p) => p,
        None => return String::new(),
    };

    let mut matches = pattern.find_iter(content);
    let first = match matches.next() {
        Some(m) => m,
        None => return String::new(),
    };
    let last_end = matches.last().map(|m| m.end()).unwrap_or(first.end());

    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let char_at = |byte: usize| chars.partition_point(|(offset, _)| *offset < byte);

    let mut start = char_at(first.start()).saturating_sub(limits.radius);
    let mut end = (char_at(last_end) + limits.radius).min(chars.len());

    while start > 0 && !chars[start - 1].1.is_whitespace() {
        start -= 1;
    }
    while end < chars.len() && !chars[end].1.is_whitespace() {
        end += 1;
    }

    let start_byte = chars.get(start).map(|(b, _)| *b).unwrap_or(content.len());
    let end_byte = chars.get(end).map(|(b, _)| *b).unwrap_or(content.len());
    let fragment = content[start_byte..end_byte].trim();

    let highlighted = pattern.replace_all(fragment, "<b>$0</b>").into_owned();
    shorten(highlighted, limits)
}

fn shorten(snippet: String, limits: &SnippetLimits) -> String {
    if snippet.chars().count() <= limits.max_chars {
        return snippet;
    }

    let cut: String = snippet.chars().take(limits.cut_chars).collect();
    let mut shortened = match cut.rfind(' ') {
        Some(space) => cut[..space].trim_end().to_string(),
        None => close_open_tag(cut),
    };
    if shortened.ends_with(',') {
        shortened.pop();
    }
    shortened
}

/// A cut without spaces may end inside a highlight; drop a dangling partial
/// tag and close the open one.
fn close_open_tag(mut cut: String) -> String {
    if let Some(lt) = cut.rfind('<') {
        if !cut[lt..].contains('>') {
            cut.truncate(lt);
        }
    }
    if cut.matches("<b>").count() > cut.matches("</b>").count() {
        cut.push_str("</b>");
    }
    cut
}

/// Title stand-in built from the first words of the page text
pub fn fallback_title(content: &str, words: usize) -> String {
    content
        .split_whitespace()
        .take(words)
        .collect::<Vec<_>>()
        .join(" ")
}
