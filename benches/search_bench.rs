use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use search_engine::cache::NoopCache;
use search_engine::config::SearchSettings;
use search_engine::indexer::Indexer;
use search_engine::models::{NewPage, SiteStatus};
use search_engine::morphology::Morphology;
use search_engine::search::QueryEngine;
use search_engine::snippet::{build_snippet, SnippetLimits};
use search_engine::store::{MemoryStore, PostingStore};
use std::sync::Arc;

const WORDS: &[&str] = &[
    "кот", "собака", "дом", "улица", "город", "река", "лес", "поле", "книга", "окно",
    "стол", "дерево", "небо", "солнце", "ветер", "дорога", "машина", "поезд", "море", "гора",
];

fn page_text(seed: usize, words: usize) -> String {
    (0..words)
        .map(|i| WORDS[(seed * 7 + i * 13) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_lemmatize(c: &mut Criterion) {
    let morphology = Morphology::default();
    let mut group = c.benchmark_group("lemmatize");

    for words in [100, 1000, 10000] {
        let text = page_text(1, words);
        group.bench_with_input(BenchmarkId::from_parameter(words), &text, |b, text| {
            b.iter(|| black_box(morphology.lemmatize(text)));
        });
    }

    group.finish();
}

fn populated_engine(pages: usize) -> QueryEngine {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let morphology = Arc::new(Morphology::default());
    let indexer = Indexer::new(store.clone(), Arc::new(NoopCache), morphology.clone());
    let site = store
        .insert_site("https://bench.test", "Bench", SiteStatus::Indexed)
        .unwrap();

    runtime.block_on(async {
        for i in 0..pages {
            let page = store
                .insert_page(NewPage {
                    site_id: site.id,
                    path: format!("/page/{}", i),
                    code: 200,
                    content: page_text(i, 200),
                    title: None,
                })
                .unwrap()
                .unwrap();
            indexer.index_page(&page).await.unwrap();
        }
    });

    QueryEngine::new(store, morphology, SearchSettings::default())
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    for pages in [100, 1000] {
        let engine = populated_engine(pages);
        group.bench_with_input(BenchmarkId::new("single_lemma", pages), &engine, |b, engine| {
            b.iter(|| black_box(engine.search("кот", None, 0, Some(20)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("three_lemmas", pages), &engine, |b, engine| {
            b.iter(|| black_box(engine.search("кот дом река", None, 0, Some(20)).unwrap()));
        });
    }

    group.finish();
}

fn bench_snippet(c: &mut Criterion) {
    let content = page_text(3, 2000);
    let terms = vec!["кот".to_string(), "собак".to_string()];
    let limits = SnippetLimits::default();

    c.bench_function("snippet_2000_words", |b| {
        b.iter(|| black_box(build_snippet(&content, &terms, &limits)));
    });
}

criterion_group!(benches, bench_lemmatize, bench_search, bench_snippet);
criterion_main!(benches);
