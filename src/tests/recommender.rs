//! End-to-end recommendation scenarios on the offline hash embedder.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::catalog::CatalogItem;
use crate::extract::{ExtractError, TextExtractor};
use crate::recommender::{Query, QueryKind, RecommendError, Recommender};
use crate::semantic::{
    CatalogIndex, EmbedVariant, Embedder, Embedding, EmbeddingError, HashEmbedder,
};

/// Counts embedding calls.
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text)
    }
}

/// Returns a fixed extraction result.
struct StubExtractor(Result<String, String>);

impl TextExtractor for StubExtractor {
    fn extract(&self, _url: &str) -> Result<String, ExtractError> {
        self.0.clone().map_err(ExtractError::Request)
    }
}

fn item(id: &str, description: &str) -> CatalogItem {
    CatalogItem::new(id, id.to_uppercase(), description, format!("https://example.com/{id}"))
}

fn scenario_items() -> Vec<CatalogItem> {
    vec![
        item("a", "leadership assessment"),
        item("b", "coding test"),
        item("c", "numerical reasoning test"),
    ]
}

fn description_index(embedder: &dyn Embedder, items: Vec<CatalogItem>) -> CatalogIndex {
    CatalogIndex::builder(embedder)
        .variants(&[EmbedVariant::Description])
        .build(items)
        .unwrap()
}

fn scenario_recommender() -> (Arc<CountingEmbedder>, Recommender) {
    let embedder = Arc::new(CountingEmbedder::new());
    let index = description_index(embedder.as_ref(), scenario_items());
    let recommender = Recommender::new(embedder.clone(), index)
        .unwrap()
        .with_index_options(&[EmbedVariant::Description], 8);
    (embedder, recommender)
}

fn ids(results: &[crate::semantic::RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.item.id.as_str()).collect()
}

#[test]
fn test_software_engineering_scenario() {
    let (_, recommender) = scenario_recommender();

    let results = recommender
        .recommend_text("test for software engineering skills", 2)
        .unwrap();

    assert_eq!(ids(&results), vec!["b", "c"]);
    assert!(results[0].score > results[1].score);
    assert!(results.iter().all(|r| (-1.0..=1.0).contains(&r.score)));
    assert_eq!(results[0].item.url, "https://example.com/b");
}

#[test]
fn test_empty_catalog() {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let recommender = Recommender::new(embedder, CatalogIndex::empty(384)).unwrap();

    let result = recommender.recommend_text("any query at all", 5);
    assert!(matches!(result, Err(RecommendError::IndexEmpty)));
}

#[test]
fn test_zero_k() {
    let (embedder, recommender) = scenario_recommender();
    let before = embedder.calls();

    let result = recommender.recommend_text("coding test", 0);
    assert!(matches!(result, Err(RecommendError::InvalidInput { field: "k", .. })));
    assert_eq!(embedder.calls(), before);
}

#[test]
fn test_url_with_empty_extraction_skips_embedding() {
    let (embedder, recommender) = scenario_recommender();
    let recommender =
        recommender.with_extractor(Some(Arc::new(StubExtractor(Ok("   ".to_string())))));
    let before = embedder.calls();

    let url = "https://jobs.example.com/21819?lang=en-us";
    let result = recommender.recommend_text(url, 3);

    match result {
        Err(RecommendError::ExtractionFailed { url: failed, .. }) => assert_eq!(failed, url),
        other => panic!("expected ExtractionFailed, got {other:?}"),
    }
    assert_eq!(embedder.calls(), before);
}

#[test]
fn test_url_with_failing_extractor() {
    let (embedder, recommender) = scenario_recommender();
    let recommender = recommender.with_extractor(Some(Arc::new(StubExtractor(Err(
        "connection refused".to_string(),
    )))));
    let before = embedder.calls();

    let result = recommender.recommend_text("https://jobs.example.com/1", 3);
    match result {
        Err(RecommendError::ExtractionFailed { reason, .. }) => {
            assert!(reason.contains("connection refused"))
        }
        other => panic!("expected ExtractionFailed, got {other:?}"),
    }
    assert_eq!(embedder.calls(), before);
}

#[test]
fn test_url_query_embeds_extracted_text() {
    let (_, recommender) = scenario_recommender();
    let recommender = recommender
        .with_extractor(Some(Arc::new(StubExtractor(Ok("Backend role: coding test".to_string())))));

    let results = recommender.recommend_text("https://jobs.example.com/1", 1).unwrap();
    assert_eq!(ids(&results), vec!["b"]);

    // forced text treats the URL as plain words instead
    let query = Query::new("https://jobs.example.com/1", 1).with_kind(QueryKind::Text);
    assert!(recommender.recommend(&query).is_ok());
}

#[test]
fn test_self_retrieval() {
    let (_, recommender) = scenario_recommender();

    for item in scenario_items() {
        let results = recommender.recommend_text(&item.description, 1).unwrap();
        assert_eq!(results[0].item.id, item.id, "query: {}", item.description);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }
}

fn larger_catalog() -> Vec<CatalogItem> {
    let skills = ["java", "python", "sql", "excel", "sales", "leadership", "numerical", "verbal"];
    let kinds = ["knowledge test", "simulation", "personality questionnaire", "reasoning test"];

    skills
        .iter()
        .enumerate()
        .flat_map(|(i, skill)| {
            kinds.iter().enumerate().map(move |(j, kind)| {
                CatalogItem::new(
                    format!("{skill}-{j}"),
                    format!("{skill} {kind}"),
                    format!("{kind} measuring {skill} skills, level {}", (i + j) % 3),
                    format!("https://example.com/{skill}-{j}"),
                )
            })
        })
        .collect()
}

fn variant_recommender() -> Recommender {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let index = CatalogIndex::builder(embedder.as_ref())
        .variants(&[EmbedVariant::Full, EmbedVariant::Description, EmbedVariant::Name])
        .build(larger_catalog())
        .unwrap();
    Recommender::new(embedder, index).unwrap().with_max_k(40)
}

#[test]
fn test_prefix_stability() {
    let recommender = variant_recommender();
    let query = "python and sql knowledge test for a mid level analyst";

    let full = recommender.recommend_text(query, 20).unwrap();
    for k in 1..20 {
        let partial = recommender.recommend_text(query, k).unwrap();
        assert_eq!(partial, full[..k].to_vec(), "k = {k}");
    }
}

#[test]
fn test_results_distinct_and_ordered() {
    let recommender = variant_recommender();
    let results = recommender
        .recommend_text("leadership personality questionnaire", 40)
        .unwrap();

    // k above the catalog size returns every item once
    assert_eq!(results.len(), 32);
    let unique = results.iter().map(|r| r.item.id.as_str()).collect::<HashSet<_>>();
    assert_eq!(unique.len(), results.len());

    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        if pair[0].score == pair[1].score {
            assert!(pair[0].item.id < pair[1].item.id);
        }
    }
}

#[test]
fn test_deterministic() {
    let recommender = variant_recommender();
    let query = "sales simulation";

    let first = recommender.recommend_text(query, 10).unwrap();
    let second = recommender.recommend_text(query, 10).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_concurrent_queries_during_rebuild() {
    let (_, recommender) = scenario_recommender();
    let recommender = Arc::new(recommender);

    let workers = (0..4)
        .map(|_| {
            let recommender = Arc::clone(&recommender);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let results = recommender.recommend_text("reasoning test", 3).unwrap();
                    assert_eq!(results.len(), 3);
                }
            })
        })
        .collect::<Vec<_>>();

    let alternate = vec![
        item("x", "verbal reasoning test"),
        item("y", "sales simulation"),
        item("z", "personality questionnaire"),
    ];
    for i in 0..20 {
        let items = if i % 2 == 0 {
            alternate.clone()
        } else {
            scenario_items()
        };
        recommender.rebuild(items).unwrap();
    }

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(recommender.index_version(), 21);
}
