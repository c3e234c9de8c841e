//! In-memory catalog index with exact cosine similarity search.
//!
//! Owns the catalog items and one entry per embedded item variant. An index
//! value is never modified after it is built; a new catalog version means a
//! new index.

use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::*;

use crate::catalog::CatalogItem;
use crate::semantic::embeddings::{Embedder, Embedding, EmbeddingError};
use crate::semantic::preprocess::{document_text, EmbedVariant};

/// Entry count from which scoring is spread over the rayon pool.
const PARALLEL_THRESHOLD: usize = 2048;

/// Default number of documents per embedding call during build.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index has no entries")]
    IndexEmpty,

    #[error("Duplicate catalog item id: {id}")]
    DuplicateItem { id: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector contains non-finite values")]
    NonFiniteVector,

    #[error("Item {id} has no text to embed")]
    EmptyDocument { id: String },

    #[error("Entry refers to unknown item position {0}")]
    UnknownItem(usize),

    #[error("Embedding failed while indexing: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// One embedded text of one catalog item.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Position of the item in the catalog
    pub item: usize,
    pub variant: EmbedVariant,
    pub embedding: Embedding,
    norm: f32,
}

/// Search result from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Catalog item id
    pub id: String,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

/// Read-only search capability the ranker depends on.
///
/// Any backend must return hits ordered by score descending, ties by
/// ascending item id, and fail with `IndexEmpty` when it holds no entries.
pub trait SearchIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Number of embedded entries (items × variants).
    fn entry_count(&self) -> usize;

    /// Number of distinct catalog items.
    fn item_count(&self) -> usize;

    fn item(&self, id: &str) -> Option<&CatalogItem>;

    /// Up to `limit` nearest entries. An item indexed under several variants
    /// may appear more than once.
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, IndexError>;
}

/// Brute-force catalog index.
#[derive(Debug, Clone)]
pub struct CatalogIndex {
    items: Vec<CatalogItem>,
    /// Item id -> position in `items`
    positions: HashMap<String, usize>,
    entries: Vec<IndexEntry>,
    dimensions: usize,
}

impl CatalogIndex {
    /// Create an index with no items.
    pub fn empty(dimensions: usize) -> Self {
        Self {
            items: vec![],
            positions: HashMap::new(),
            entries: vec![],
            dimensions,
        }
    }

    /// Embed every item's full document text and index it.
    pub fn build(items: Vec<CatalogItem>, embedder: &dyn Embedder) -> Result<Self, IndexError> {
        Self::builder(embedder).build(items)
    }

    pub fn builder(embedder: &dyn Embedder) -> IndexBuilder<'_> {
        IndexBuilder::new(embedder)
    }

    /// Assemble an index from already computed entries, e.g. when loading
    /// from storage. Entries are `(item position, variant, embedding)`.
    pub fn from_parts(
        dimensions: usize,
        items: Vec<CatalogItem>,
        entries: Vec<(usize, EmbedVariant, Embedding)>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::with_items(dimensions, items)?;
        index.entries.reserve(entries.len());

        for (item, variant, embedding) in entries {
            index.push_entry(item, variant, embedding)?;
        }

        Ok(index)
    }

    fn with_items(dimensions: usize, items: Vec<CatalogItem>) -> Result<Self, IndexError> {
        let mut positions = HashMap::with_capacity(items.len());

        for (pos, item) in items.iter().enumerate() {
            if positions.insert(item.id.clone(), pos).is_some() {
                return Err(IndexError::DuplicateItem {
                    id: item.id.clone(),
                });
            }
        }

        Ok(Self {
            items,
            positions,
            entries: vec![],
            dimensions,
        })
    }

    fn push_entry(
        &mut self,
        item: usize,
        variant: EmbedVariant,
        embedding: Embedding,
    ) -> Result<(), IndexError> {
        if item >= self.items.len() {
            return Err(IndexError::UnknownItem(item));
        }

        let norm = self.check_vector(&embedding)?;
        self.entries.push(IndexEntry {
            item,
            variant,
            embedding,
            norm,
        });

        Ok(())
    }

    /// Validate dimensions and norm, returning the L2 norm.
    fn check_vector(&self, vector: &[f32]) -> Result<f32, IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let norm = l2_norm(vector);
        if !norm.is_finite() {
            return Err(IndexError::NonFiniteVector);
        }
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(norm)
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn item_id(&self, entry: usize) -> &str {
        &self.items[self.entries[entry].item].id
    }

    fn score(&self, query: &[f32], query_norm: f32, entry: &IndexEntry) -> f32 {
        let dot_product: f32 = query
            .iter()
            .zip(entry.embedding.iter())
            .map(|(a, b)| a * b)
            .sum();
        (dot_product / (query_norm * entry.norm)).clamp(-1.0, 1.0)
    }
}

impl SearchIndex for CatalogIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn item(&self, id: &str) -> Option<&CatalogItem> {
        self.positions.get(id).map(|&pos| &self.items[pos])
    }

    /// Search for similar entries using cosine similarity.
    ///
    /// # Returns
    /// Up to `limit` hits sorted by similarity (highest first), equal scores
    /// ordered by item id.
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.entries.is_empty() {
            return Err(IndexError::IndexEmpty);
        }

        let query_norm = self.check_vector(query)?;

        let mut scored: Vec<(usize, f32)> = if self.entries.len() >= PARALLEL_THRESHOLD {
            self.entries
                .par_iter()
                .enumerate()
                .map(|(pos, entry)| (pos, self.score(query, query_norm, entry)))
                .collect()
        } else {
            self.entries
                .iter()
                .enumerate()
                .map(|(pos, entry)| (pos, self.score(query, query_norm, entry)))
                .collect()
        };

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.item_id(a.0).cmp(self.item_id(b.0)))
                .then_with(|| a.0.cmp(&b.0))
        });

        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| SearchHit {
                id: self.item_id(pos).to_string(),
                score,
            })
            .collect())
    }
}

/// Offline index construction.
pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
    variants: Vec<EmbedVariant>,
    batch_size: usize,
    on_progress: Option<Box<dyn Fn(usize, usize) + 'a>>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self {
            embedder,
            variants: vec![EmbedVariant::Full],
            batch_size: DEFAULT_BATCH_SIZE,
            on_progress: None,
        }
    }

    /// Texts to embed per item. Repeated variants are ignored.
    pub fn variants(mut self, variants: &[EmbedVariant]) -> Self {
        let mut unique = Vec::with_capacity(variants.len());
        for variant in variants {
            if !unique.contains(variant) {
                unique.push(*variant);
            }
        }
        if !unique.is_empty() {
            self.variants = unique;
        }
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Called with `(embedded documents, total documents)` after every batch.
    pub fn on_progress(mut self, f: impl Fn(usize, usize) + 'a) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Embed every item and produce a new index.
    ///
    /// Duplicate ids are rejected before any text is embedded.
    pub fn build(self, items: Vec<CatalogItem>) -> Result<CatalogIndex, IndexError> {
        let mut index = CatalogIndex::with_items(self.embedder.dimensions(), items)?;

        let mut documents = Vec::with_capacity(index.items.len() * self.variants.len());
        for (pos, item) in index.items.iter().enumerate() {
            let before = documents.len();
            for &variant in &self.variants {
                if let Some(text) = document_text(item, variant) {
                    documents.push((pos, variant, text));
                }
            }
            if documents.len() == before {
                return Err(IndexError::EmptyDocument {
                    id: item.id.clone(),
                });
            }
        }

        let total = documents.len();
        log::info!(
            "embedding {total} documents for {} items with '{}'",
            index.items.len(),
            self.embedder.name()
        );

        let mut done = 0;
        for batch in documents.chunks(self.batch_size) {
            let texts = batch
                .iter()
                .map(|(_, _, text)| text.clone())
                .collect::<Vec<_>>();
            let embeddings = self.embedder.embed_batch(&texts)?;

            if embeddings.len() != batch.len() {
                return Err(IndexError::Embedding(EmbeddingError::EmbeddingFailed(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                ))));
            }

            for ((pos, variant, _), embedding) in batch.iter().zip(embeddings) {
                index.push_entry(*pos, *variant, embedding)?;
            }

            done += batch.len();
            if let Some(on_progress) = &self.on_progress {
                on_progress(done, total);
            }
        }

        Ok(index)
    }
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::hash::HashEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn item(id: &str, name: &str, description: &str) -> CatalogItem {
        CatalogItem::new(id, name, description, format!("https://example.com/{id}"))
    }

    fn manual_index(vectors: &[(&str, Vec<f32>)]) -> CatalogIndex {
        let items = vectors
            .iter()
            .map(|(id, _)| item(id, id, id))
            .collect::<Vec<_>>();
        let entries = vectors
            .iter()
            .enumerate()
            .map(|(pos, (_, v))| (pos, EmbedVariant::Full, v.clone()))
            .collect();
        CatalogIndex::from_parts(3, items, entries).unwrap()
    }

    /// Counts calls so tests can assert nothing was embedded.
    struct CountingEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.embed(text)
        }
    }

    #[test]
    fn test_empty_index() {
        let index = CatalogIndex::empty(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.item_count(), 0);

        let result = index.search(&vec![1.0; 384], 10);
        assert!(matches!(result, Err(IndexError::IndexEmpty)));
    }

    #[test]
    fn test_search_basic() {
        let index = manual_index(&[
            ("a", vec![1.0, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0]),
        ]);

        let results = index.search(&[1.0, 0.1, 0.0], 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_scores_within_cosine_range() {
        let index = manual_index(&[
            ("a", vec![1.0, 0.0, 0.0]),
            ("b", vec![-1.0, 0.0, 0.0]),
            ("c", vec![0.3, 0.3, 0.3]),
        ]);

        let results = index.search(&[2.0, 0.0, 0.0], 10).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[2].score + 1.0).abs() < 1e-6);
        assert!(results.iter().all(|r| (-1.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn test_ties_broken_by_item_id() {
        let index = manual_index(&[
            ("zeta", vec![1.0, 0.0, 0.0]),
            ("alpha", vec![1.0, 0.0, 0.0]),
            ("mid", vec![1.0, 0.0, 0.0]),
        ]);

        let ids = index
            .search(&[1.0, 0.0, 0.0], 10)
            .unwrap()
            .into_iter()
            .map(|hit| hit.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_search_with_limit() {
        let vectors = (0..10)
            .map(|i| (format!("item-{i}"), vec![1.0, i as f32 * 0.1, 0.0]))
            .collect::<Vec<_>>();
        let borrowed = vectors
            .iter()
            .map(|(id, v)| (id.as_str(), v.clone()))
            .collect::<Vec<_>>();
        let index = manual_index(&borrowed);

        assert_eq!(index.search(&[1.0, 0.0, 0.0], 3).unwrap().len(), 3);
        // limit above entry count returns everything
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 50).unwrap().len(), 10);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = manual_index(&[("a", vec![1.0, 0.0, 0.0])]);
        let result = index.search(&[1.0, 0.0], 5);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_zero_norm_rejected() {
        let items = vec![item("a", "a", "a")];
        let result =
            CatalogIndex::from_parts(3, items, vec![(0, EmbedVariant::Full, vec![0.0; 3])]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));

        let index = manual_index(&[("a", vec![1.0, 0.0, 0.0])]);
        assert!(matches!(
            index.search(&[0.0, 0.0, 0.0], 1),
            Err(IndexError::ZeroNormVector)
        ));
    }

    #[test]
    fn test_from_parts_rejects_unknown_item() {
        let items = vec![item("a", "a", "a")];
        let result =
            CatalogIndex::from_parts(3, items, vec![(4, EmbedVariant::Full, vec![1.0, 0.0, 0.0])]);
        assert!(matches!(result, Err(IndexError::UnknownItem(4))));
    }

    #[test]
    fn test_build_rejects_duplicates_before_embedding() {
        let embedder = CountingEmbedder {
            inner: HashEmbedder::default(),
            calls: AtomicUsize::new(0),
        };
        let items = vec![
            item("a", "Leadership", "leadership assessment"),
            item("b", "Coding", "coding test"),
            item("a", "Again", "duplicate id"),
        ];

        let result = CatalogIndex::build(items, &embedder);
        assert!(matches!(result, Err(IndexError::DuplicateItem { id }) if id == "a"));
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_build_with_variants() {
        let embedder = HashEmbedder::default();
        let items = vec![
            item("a", "Leadership", "leadership assessment"),
            item("b", "Coding", "coding test"),
        ];

        let index = CatalogIndex::builder(&embedder)
            .variants(&[EmbedVariant::Full, EmbedVariant::Description, EmbedVariant::Full])
            .build(items)
            .unwrap();

        assert_eq!(index.item_count(), 2);
        assert_eq!(index.entry_count(), 4);
        assert_eq!(index.item("b").unwrap().name, "Coding");
        assert!(index.item("missing").is_none());
    }

    #[test]
    fn test_build_reports_progress() {
        let embedder = HashEmbedder::default();
        let items = (0..5)
            .map(|i| item(&format!("i{i}"), &format!("Item {i}"), "some text"))
            .collect::<Vec<_>>();

        let seen = std::cell::RefCell::new(vec![]);
        CatalogIndex::builder(&embedder)
            .batch_size(2)
            .on_progress(|done, total| seen.borrow_mut().push((done, total)))
            .build(items)
            .unwrap();

        assert_eq!(*seen.borrow(), vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn test_build_empty_document() {
        let embedder = HashEmbedder::default();
        let items = vec![item("a", "Name", "   ")];

        let result = CatalogIndex::builder(&embedder)
            .variants(&[EmbedVariant::Description])
            .build(items);
        assert!(matches!(result, Err(IndexError::EmptyDocument { id }) if id == "a"));
    }

    #[test]
    fn test_build_empty_catalog() {
        let embedder = HashEmbedder::new(16);
        let index = CatalogIndex::build(vec![], &embedder).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), 16);
    }

    #[test]
    fn test_parallel_search_matches_sequential_order() {
        let embedder = HashEmbedder::new(32);
        let items = (0..PARALLEL_THRESHOLD + 10)
            .map(|i| {
                let description = format!("skill {} level {}", i % 7, i % 3);
                item(&format!("item-{i:05}"), "Assessment", &description)
            })
            .collect::<Vec<_>>();
        let index = CatalogIndex::builder(&embedder)
            .variants(&[EmbedVariant::Description])
            .build(items)
            .unwrap();

        let query = embedder.embed("skill 3 level 1").unwrap();
        let hits = index.search(&query, 100).unwrap();

        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                assert!(pair[0].id < pair[1].id);
            }
        }
    }
}
