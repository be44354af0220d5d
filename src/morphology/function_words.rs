//! Closed word classes the analyzers tag as function words.

use super::analyzer::Tag;

pub const RUSSIAN_CONJUNCTIONS: &[&str] = &[
    "и", "а", "но", "или", "либо", "да", "что", "чтобы", "если", "когда", "хотя", "потому",
    "также", "тоже", "зато", "однако", "ибо", "будто", "словно", "пока", "едва", "причем",
    "притом", "поэтому", "затем", "итак", "то", "дабы",
];

pub const RUSSIAN_PREPOSITIONS: &[&str] = &[
    "в", "во", "на", "с", "со", "к", "ко", "по", "о", "об", "обо", "от", "ото", "до", "из",
    "изо", "у", "за", "над", "надо", "под", "подо", "при", "про", "для", "без", "безо",
    "через", "между", "перед", "передо", "около", "вокруг", "после", "среди", "ради",
    "сквозь", "вдоль", "против", "возле", "мимо", "вместо", "кроме", "из-за", "из-под",
];

pub const RUSSIAN_PARTICLES: &[&str] = &[
    "не", "ни", "же", "ли", "бы", "б", "вот", "вон", "даже", "уже", "лишь", "только", "ведь",
    "разве", "неужели", "пусть", "пускай", "именно", "как", "ж", "ль",
];

pub const RUSSIAN_INTERJECTIONS: &[&str] = &[
    "ах", "ох", "эх", "ой", "ух", "ого", "увы", "ура", "эй", "ну", "ага", "ау", "фу", "тьфу",
    "браво", "ай", "эге", "ахти", "батюшки",
];

pub const ENGLISH_CONJUNCTIONS: &[&str] = &[
    "and", "or", "but", "nor", "yet", "so", "if", "because", "although", "though", "while",
    "whereas", "unless", "since", "that", "whether", "than", "as", "either", "neither",
];

pub const ENGLISH_PREPOSITIONS: &[&str] = &[
    "in", "on", "at", "to", "of", "for", "with", "by", "from", "about", "into", "onto",
    "over", "under", "between", "among", "through", "during", "before", "after", "above",
    "below", "without", "within", "against", "upon", "across", "behind", "beyond", "near",
    "toward", "towards", "via", "per", "off", "out",
];

/// Articles are grouped with particles: they carry no meaning for ranking either.
pub const ENGLISH_PARTICLES: &[&str] = &["the", "a", "an", "not", "no", "to"];

pub const ENGLISH_INTERJECTIONS: &[&str] = &[
    "oh", "ah", "wow", "hey", "oops", "ouch", "alas", "hmm", "huh", "ugh", "yay", "hurray",
];

pub fn russian() -> Vec<(&'static str, Tag)> {
    tagged(
        RUSSIAN_CONJUNCTIONS,
        RUSSIAN_PREPOSITIONS,
        RUSSIAN_PARTICLES,
        RUSSIAN_INTERJECTIONS,
    )
}

pub fn english() -> Vec<(&'static str, Tag)> {
    tagged(
        ENGLISH_CONJUNCTIONS,
        ENGLISH_PREPOSITIONS,
        ENGLISH_PARTICLES,
        ENGLISH_INTERJECTIONS,
    )
}

// Later classes win on overlap, matching how the analyzers report a single tag.
fn tagged(
    conjunctions: &[&'static str],
    prepositions: &[&'static str],
    particles: &[&'static str],
    interjections: &[&'static str],
) -> Vec<(&'static str, Tag)> {
    let mut words = Vec::new();
    words.extend(conjunctions.iter().map(|w| (*w, Tag::Conjunction)));
    words.extend(prepositions.iter().map(|w| (*w, Tag::Preposition)));
    words.extend(particles.iter().map(|w| (*w, Tag::Particle)));
    words.extend(interjections.iter().map(|w| (*w, Tag::Interjection)));
    words
}
