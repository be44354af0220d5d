use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use super::{function_words, MorphologyError, Script};

/// Grammatical class reported for a normal form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Pronoun,
    Numeral,
    Conjunction,
    Preposition,
    Particle,
    Interjection,
    Unknown,
}

impl Tag {
    /// Function words are dropped before counting
    pub fn is_function_word(&self) -> bool {
        matches!(
            self,
            Tag::Conjunction | Tag::Preposition | Tag::Particle | Tag::Interjection
        )
    }
}

impl FromStr for Tag {
    type Err = MorphologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = match s.to_ascii_uppercase().as_str() {
            "NOUN" | "N" | "С" => Tag::Noun,
            "VERB" | "V" | "Г" => Tag::Verb,
            "ADJ" | "ADJECTIVE" | "П" => Tag::Adjective,
            "ADV" | "ADVERB" | "Н" => Tag::Adverb,
            "PRON" | "PRONOUN" | "МС" => Tag::Pronoun,
            "NUM" | "NUMERAL" | "ЧИСЛ" => Tag::Numeral,
            "CONJ" | "CONJUNCTION" | "СОЮЗ" => Tag::Conjunction,
            "PREP" | "PREPOSITION" | "ПРЕДЛ" => Tag::Preposition,
            "PART" | "PARTICLE" | "ЧАСТ" => Tag::Particle,
            "INTJ" | "INTERJECTION" | "МЕЖД" => Tag::Interjection,
            "UNKNOWN" | "X" => Tag::Unknown,
            other => return Err(MorphologyError::UnknownTag(other.to_string())),
        };
        Ok(tag)
    }
}

/// One dictionary reading of a surface word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordForm {
    pub normal: String,
    pub tag: Tag,
}

impl WordForm {
    pub fn new(normal: impl Into<String>, tag: Tag) -> Self {
        Self {
            normal: normal.into(),
            tag,
        }
    }
}

/// Per-language analyzer that maps a lower-cased word to its readings
pub trait MorphAnalyzer: Send + Sync {
    /// Every normal form the word may have; homonyms yield several entries
    fn analyze(&self, word: &str) -> Result<Vec<WordForm>, MorphologyError>;

    fn script(&self) -> Script;
}

/// Snowball stemmer plus a closed-class lexicon for tagging function words
pub struct SnowballAnalyzer {
    stemmer: Stemmer,
    script: Script,
    function_words: HashMap<&'static str, Tag>,
}

impl SnowballAnalyzer {
    pub fn russian() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::Russian),
            script: Script::Cyrillic,
            function_words: function_words::russian().into_iter().collect(),
        }
    }

    pub fn english() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            script: Script::Latin,
            function_words: function_words::english().into_iter().collect(),
        }
    }
}

impl MorphAnalyzer for SnowballAnalyzer {
    fn analyze(&self, word: &str) -> Result<Vec<WordForm>, MorphologyError> {
        if word.is_empty() {
            return Err(MorphologyError::EmptyWord);
        }
        if Script::of(word) != Some(self.script) {
            return Err(MorphologyError::UnsupportedWord(word.to_string()));
        }

        if let Some(tag) = self.function_words.get(word) {
            return Ok(vec![WordForm::new(word, *tag)]);
        }

        let stem = self.stemmer.stem(word);
        Ok(vec![WordForm::new(stem.into_owned(), Tag::Unknown)])
    }

    fn script(&self) -> Script {
        self.script
    }
}

const RUSSIAN_LEXICON: &str = include_str!("lexicon/ru.txt");
const ENGLISH_LEXICON: &str = include_str!("lexicon/en.txt");

/// Bundled lemma lexicon over a Snowball analyzer.
///
/// Lemmas are indexed by their stem. A word that is itself a lemma reads as
/// that lemma; an inflected word reads as every lemma sharing its stem, and a
/// word with no lemma behind its stem falls back to the stem. Closed-class
/// words keep the reading of the underlying analyzer.
pub struct LexiconAnalyzer {
    lemmas: HashMap<String, Tag>,
    by_stem: HashMap<String, Vec<WordForm>>,
    stemmer: SnowballAnalyzer,
}

impl LexiconAnalyzer {
    pub fn russian() -> Self {
        Self::bundled(RUSSIAN_LEXICON, SnowballAnalyzer::russian())
    }

    pub fn english() -> Self {
        Self::bundled(ENGLISH_LEXICON, SnowballAnalyzer::english())
    }

    /// Lexicon text in `lemma TAG` lines; a missing tag reads as unknown
    pub fn from_text(text: &str, stemmer: SnowballAnalyzer) -> Result<Self, MorphologyError> {
        let mut analyzer = Self::empty(stemmer);
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let lemma = parts
                .next()
                .ok_or_else(|| MorphologyError::MalformedEntry(line.to_string()))?;
            let tag = match parts.next() {
                Some(raw) => raw.parse::<Tag>().map_err(|e| MorphologyError::Dictionary {
                    line: line_no + 1,
                    reason: e.to_string(),
                })?,
                None => Tag::Unknown,
            };
            analyzer.insert(lemma, tag);
        }
        Ok(analyzer)
    }

    /// The bundled lexicons only carry known tags; anything else reads as unknown
    fn bundled(text: &str, stemmer: SnowballAnalyzer) -> Self {
        let mut analyzer = Self::empty(stemmer);
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            if let Some(lemma) = parts.next() {
                let tag = parts
                    .next()
                    .and_then(|raw| raw.parse::<Tag>().ok())
                    .unwrap_or(Tag::Unknown);
                analyzer.insert(lemma, tag);
            }
        }
        analyzer
    }

    fn empty(stemmer: SnowballAnalyzer) -> Self {
        Self {
            lemmas: HashMap::new(),
            by_stem: HashMap::new(),
            stemmer,
        }
    }

    pub fn insert(&mut self, lemma: &str, tag: Tag) {
        let lemma = lemma.to_lowercase();
        if self.lemmas.contains_key(&lemma) {
            return;
        }
        let stem = self.stemmer.stemmer.stem(&lemma).into_owned();
        self.by_stem
            .entry(stem)
            .or_default()
            .push(WordForm::new(lemma.clone(), tag));
        self.lemmas.insert(lemma, tag);
    }

    pub fn len(&self) -> usize {
        self.lemmas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lemmas.is_empty()
    }
}

impl MorphAnalyzer for LexiconAnalyzer {
    fn analyze(&self, word: &str) -> Result<Vec<WordForm>, MorphologyError> {
        let mut forms = self.stemmer.analyze(word)?;
        if forms.iter().any(|f| f.tag != Tag::Unknown) {
            return Ok(forms);
        }
        if let Some(tag) = self.lemmas.get(word) {
            return Ok(vec![WordForm::new(word, *tag)]);
        }

        let stem = match forms.pop() {
            Some(form) => form.normal,
            None => return Ok(Vec::new()),
        };
        match self.by_stem.get(&stem) {
            Some(readings) => Ok(readings.clone()),
            None => Ok(vec![WordForm::new(stem, Tag::Unknown)]),
        }
    }

    fn script(&self) -> Script {
        self.stemmer.script()
    }
}

/// Dictionary of known word forms layered over a fallback analyzer.
///
/// The dictionary format is one reading per line: `form normal TAG`.
/// Several lines for the same form describe homonyms. Blank lines and lines
/// starting with `#` are ignored.
pub struct DictionaryAnalyzer {
    entries: HashMap<String, Vec<WordForm>>,
    fallback: Box<dyn MorphAnalyzer>,
}

impl DictionaryAnalyzer {
    pub fn new(fallback: Box<dyn MorphAnalyzer>) -> Self {
        Self {
            entries: HashMap::new(),
            fallback,
        }
    }

    pub fn from_file<P: AsRef<Path>>(
        path: P,
        fallback: Box<dyn MorphAnalyzer>,
    ) -> Result<Self, MorphologyError> {
        let file = std::fs::File::open(path.as_ref())?;
        let mut analyzer = Self::new(fallback);
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            analyzer
                .add_line(&line)
                .map_err(|e| MorphologyError::Dictionary {
                    line: line_no + 1,
                    reason: e.to_string(),
                })?;
        }
        Ok(analyzer)
    }

    /// Parse dictionary text already held in memory
    pub fn from_text(text: &str, fallback: Box<dyn MorphAnalyzer>) -> Result<Self, MorphologyError> {
        let mut analyzer = Self::new(fallback);
        for (line_no, line) in text.lines().enumerate() {
            analyzer
                .add_line(line)
                .map_err(|e| MorphologyError::Dictionary {
                    line: line_no + 1,
                    reason: e.to_string(),
                })?;
        }
        Ok(analyzer)
    }

    pub fn insert(&mut self, form: &str, reading: WordForm) {
        let readings = self.entries.entry(form.to_lowercase()).or_default();
        if !readings.contains(&reading) {
            readings.push(reading);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add_line(&mut self, line: &str) -> Result<(), MorphologyError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let mut parts = line.split_whitespace();
        let (form, normal) = match (parts.next(), parts.next()) {
            (Some(form), Some(normal)) => (form, normal),
            _ => return Err(MorphologyError::MalformedEntry(line.to_string())),
        };
        let tag = match parts.next() {
            Some(raw) => raw.parse::<Tag>()?,
            None => Tag::Unknown,
        };

        self.insert(form, WordForm::new(normal.to_lowercase(), tag));
        Ok(())
    }
}

impl MorphAnalyzer for DictionaryAnalyzer {
    fn analyze(&self, word: &str) -> Result<Vec<WordForm>, MorphologyError> {
        match self.entries.get(word) {
            Some(readings) => Ok(readings.clone()),
            None => self.fallback.analyze(word),
        }
    }

    fn script(&self) -> Script {
        self.fallback.script()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_russian_stemming() {
        let analyzer = SnowballAnalyzer::russian();
        let forms = analyzer.analyze("кот").unwrap();
        assert_eq!(forms, vec![WordForm::new("кот", Tag::Unknown)]);

        let forms = analyzer.analyze("собака").unwrap();
        assert_eq!(forms[0].normal, "собак");
    }

    #[test]
    fn test_english_stemming() {
        let analyzer = SnowballAnalyzer::english();
        assert_eq!(analyzer.analyze("cats").unwrap()[0].normal, "cat");
        assert_eq!(analyzer.analyze("running").unwrap()[0].normal, "run");
    }

    #[test]
    fn test_function_words_are_tagged() {
        let ru = SnowballAnalyzer::russian();
        assert!(ru.analyze("и").unwrap()[0].tag.is_function_word());
        assert!(ru.analyze("под").unwrap()[0].tag.is_function_word());
        assert!(ru.analyze("ой").unwrap()[0].tag.is_function_word());

        let en = SnowballAnalyzer::english();
        assert!(en.analyze("the").unwrap()[0].tag.is_function_word());
        assert!(en.analyze("with").unwrap()[0].tag.is_function_word());
        assert!(!en.analyze("search").unwrap()[0].tag.is_function_word());
    }

    #[test]
    fn test_wrong_script_is_rejected() {
        let ru = SnowballAnalyzer::russian();
        assert!(matches!(
            ru.analyze("cat"),
            Err(MorphologyError::UnsupportedWord(_))
        ));
        assert!(matches!(ru.analyze(""), Err(MorphologyError::EmptyWord)));
    }

    #[test]
    fn test_lexicon_resolves_inflections_to_lemmas() {
        let ru = LexiconAnalyzer::russian();
        assert_eq!(ru.analyze("собака").unwrap(), vec![WordForm::new("собака", Tag::Noun)]);
        assert_eq!(ru.analyze("собаки").unwrap()[0].normal, "собака");
        assert_eq!(ru.analyze("собакой").unwrap()[0].normal, "собака");
        assert_eq!(ru.analyze("коты").unwrap()[0].normal, "кот");
        assert_eq!(ru.analyze("кота").unwrap()[0].normal, "кот");

        let en = LexiconAnalyzer::english();
        assert_eq!(en.analyze("cats").unwrap()[0].normal, "cat");
        assert_eq!(en.analyze("running").unwrap()[0].normal, "run");
    }

    #[test]
    fn test_lexicon_falls_back_to_stem() {
        let ru = LexiconAnalyzer::from_text("кот NOUN\n", SnowballAnalyzer::russian()).unwrap();
        assert_eq!(ru.len(), 1);
        assert_eq!(ru.analyze("собаки").unwrap(), vec![WordForm::new("собак", Tag::Unknown)]);
        // closed-class words are not looked up
        assert!(ru.analyze("и").unwrap()[0].tag.is_function_word());
    }

    #[test]
    fn test_lexicon_stem_homonyms() {
        let en = LexiconAnalyzer::from_text(
            "# both stem to \"run\"\nrun VERB\nrunning NOUN\n",
            SnowballAnalyzer::english(),
        )
        .unwrap();
        assert_eq!(
            en.analyze("runs").unwrap(),
            vec![WordForm::new("run", Tag::Verb), WordForm::new("running", Tag::Noun)]
        );
        // a lemma spelled out reads only as itself
        assert_eq!(en.analyze("running").unwrap(), vec![WordForm::new("running", Tag::Noun)]);
    }

    #[test]
    fn test_bundled_lexicons_are_well_formed() {
        for text in [RUSSIAN_LEXICON, ENGLISH_LEXICON] {
            for line in text.lines().filter(|l| !l.starts_with('#') && !l.trim().is_empty()) {
                let mut parts = line.split_whitespace();
                assert!(parts.next().is_some(), "empty entry: {:?}", line);
                let tag = parts.next().unwrap();
                assert!(tag.parse::<Tag>().is_ok(), "bad tag in {:?}", line);
                assert!(parts.next().is_none(), "trailing text in {:?}", line);
            }
        }
        let malformed = LexiconAnalyzer::from_text("кот ZZZ", SnowballAnalyzer::russian());
        assert!(matches!(malformed, Err(MorphologyError::Dictionary { line: 1, .. })));
    }

    #[test]
    fn test_dictionary_homonyms_and_fallback() {
        let dictionary = "\
# form normal tag
стали сталь NOUN
стали стать VERB

собака собака NOUN
";
        let analyzer =
            DictionaryAnalyzer::from_text(dictionary, Box::new(SnowballAnalyzer::russian()))
                .unwrap();
        assert_eq!(analyzer.len(), 2);

        let forms = analyzer.analyze("стали").unwrap();
        assert_eq!(
            forms,
            vec![
                WordForm::new("сталь", Tag::Noun),
                WordForm::new("стать", Tag::Verb)
            ]
        );
        assert_eq!(analyzer.analyze("собака").unwrap()[0].normal, "собака");
        // unknown words go to the stemmer
        assert_eq!(analyzer.analyze("кошки").unwrap()[0].normal, "кошк");
    }

    #[test]
    fn test_dictionary_rejects_bad_lines() {
        let err = DictionaryAnalyzer::from_text("одно", Box::new(SnowballAnalyzer::russian()));
        assert!(matches!(err, Err(MorphologyError::Dictionary { line: 1, .. })));

        let err = DictionaryAnalyzer::from_text(
            "кот кот ZZZ",
            Box::new(SnowballAnalyzer::russian()),
        );
        assert!(matches!(err, Err(MorphologyError::Dictionary { line: 1, .. })));
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!("conj".parse::<Tag>().unwrap(), Tag::Conjunction);
        assert_eq!("ПРЕДЛ".parse::<Tag>().unwrap(), Tag::Preposition);
        assert!("???".parse::<Tag>().is_err());
    }
}
