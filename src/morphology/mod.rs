//! Tokenizer and lemma normalizer for Russian and English text.

pub mod analyzer;
pub mod function_words;

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use thiserror::Error;
use tracing::trace;

use crate::models::LemmaFrequencies;
use crate::parser;

pub use analyzer::{
    DictionaryAnalyzer, LexiconAnalyzer, MorphAnalyzer, SnowballAnalyzer, Tag, WordForm,
};

lazy_static! {
    static ref TOKEN_SEPARATORS: Regex =
        Regex::new(r#"[\s,.;:!?()\[\]{}"«»“”„'…—–/|<>+=*&^%$#@~`\\]+"#)
            .expect("token separator pattern is valid");
}

#[derive(Error, Debug)]
pub enum MorphologyError {
    #[error("Empty word")]
    EmptyWord,

    #[error("Word '{0}' is not handled by this analyzer")]
    UnsupportedWord(String),

    #[error("Unknown grammatical tag '{0}'")]
    UnknownTag(String),

    #[error("Malformed dictionary entry '{0}'")]
    MalformedEntry(String),

    #[error("Dictionary line {line}: {reason}")]
    Dictionary { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alphabet a token is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Cyrillic,
    Latin,
}

impl Script {
    /// Script of a token when every char belongs to one alphabet, `None` otherwise
    pub fn of(word: &str) -> Option<Script> {
        let mut chars = word.chars().peekable();
        chars.peek()?;
        if word.chars().all(is_cyrillic) {
            Some(Script::Cyrillic)
        } else if word.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Script::Latin)
        } else {
            None
        }
    }
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{04FF}')
}

/// Language-aware lemmatizer; stateless after construction and shared freely
pub struct Morphology {
    russian: Box<dyn MorphAnalyzer>,
    english: Box<dyn MorphAnalyzer>,
}

/// Bundled lexicons for both languages
impl Default for Morphology {
    fn default() -> Self {
        Self::new(
            Box::new(LexiconAnalyzer::russian()),
            Box::new(LexiconAnalyzer::english()),
        )
    }
}

impl Morphology {
    pub fn new(russian: Box<dyn MorphAnalyzer>, english: Box<dyn MorphAnalyzer>) -> Self {
        Self { russian, english }
    }

    /// Bundled lexicons, each optionally overlaid by a dictionary file
    pub fn with_dictionaries(
        russian_dictionary: Option<&Path>,
        english_dictionary: Option<&Path>,
    ) -> Result<Self, MorphologyError> {
        let russian: Box<dyn MorphAnalyzer> = match russian_dictionary {
            Some(path) => Box::new(DictionaryAnalyzer::from_file(
                path,
                Box::new(LexiconAnalyzer::russian()),
            )?),
            None => Box::new(LexiconAnalyzer::russian()),
        };
        let english: Box<dyn MorphAnalyzer> = match english_dictionary {
            Some(path) => Box::new(DictionaryAnalyzer::from_file(
                path,
                Box::new(LexiconAnalyzer::english()),
            )?),
            None => Box::new(LexiconAnalyzer::english()),
        };
        Ok(Self::new(russian, english))
    }

    /// Count the normal forms of every meaningful word in `text`.
    ///
    /// Markup is reduced to its visible text first. Tokens mixing alphabets,
    /// digits and function words are not counted. A homonym counts towards
    /// each of its normal forms.
    pub fn lemmatize(&self, text: &str) -> LemmaFrequencies {
        let mut frequencies = LemmaFrequencies::new();
        if text.trim().is_empty() {
            return frequencies;
        }

        let visible;
        let text = if parser::looks_like_markup(text) {
            visible = parser::extract_text(text);
            visible.as_str()
        } else {
            text
        };

        for token in self.tokens(text) {
            for normal in self.normal_forms(&token) {
                *frequencies.entry(normal).or_insert(0) += 1;
            }
        }
        frequencies
    }

    /// Distinct normal forms of a search query, in first-seen order
    pub fn query_lemmas(&self, query: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for token in self.tokens(query) {
            for normal in self.normal_forms(&token) {
                if !seen.contains(&normal) {
                    seen.push(normal);
                }
            }
        }
        seen
    }

    fn tokens<'a>(&self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        TOKEN_SEPARATORS
            .split(text)
            .filter(|t| !t.is_empty())
            .map(|t| t.trim_matches('-').to_lowercase())
            .filter(|t| !t.is_empty())
    }

    fn normal_forms(&self, token: &str) -> Vec<String> {
        let analyzer = match Script::of(token) {
            Some(Script::Cyrillic) => &self.russian,
            Some(Script::Latin) => &self.english,
            None => return Vec::new(),
        };

        match analyzer.analyze(token) {
            Ok(forms) => {
                let mut normals: Vec<String> = Vec::with_capacity(forms.len());
                for form in forms {
                    if form.tag.is_function_word() || normals.contains(&form.normal) {
                        continue;
                    }
                    normals.push(form.normal);
                }
                normals
            }
            Err(e) => {
                trace!("Skipping token '{}': {}", token, e);
                Vec::new()
            }
        }
    }
}
