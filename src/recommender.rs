//! The `recommend(query, k)` entry point.
//!
//! validate -> (extract, for URL queries) -> embed -> rank against a snapshot
//! of the active index. Each call is independent; nothing on this path
//! mutates the catalog or the index, and nothing is retried.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;
use crate::extract::{looks_like_url, TextExtractor};
use crate::semantic::{
    normalize_query, ActiveIndex, CatalogIndex, EmbedVariant, Embedder, EmbeddingError,
    IndexError, IndexSnapshot, RankError, RankedResult, Ranker, SearchIndex, DEFAULT_BATCH_SIZE,
};

/// Default upper bound on results per query
pub const DEFAULT_MAX_K: usize = 10;

/// How the query text should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// URL when the text is structurally a URL, text otherwise
    #[default]
    Auto,
    Text,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub k: usize,
    pub kind: QueryKind,
}

impl Query {
    pub fn new(text: impl Into<String>, k: usize) -> Self {
        Self {
            text: text.into(),
            k,
            kind: QueryKind::Auto,
        }
    }

    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("invalid {field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error("no recommendations available: the index is empty")]
    IndexEmpty,

    #[error("could not read {url}: {reason}")]
    ExtractionFailed { url: String, reason: String },

    #[error("duplicate catalog item id: {id}")]
    DuplicateItem { id: String },

    #[error("embedding failed while {stage}: {source}")]
    Embedding {
        stage: &'static str,
        #[source]
        source: EmbeddingError,
    },

    #[error("index error while {stage}: {source}")]
    Index {
        stage: &'static str,
        #[source]
        source: IndexError,
    },
}

impl RecommendError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        RecommendError::InvalidInput {
            field,
            message: message.into(),
        }
    }

    fn from_index(stage: &'static str, err: IndexError) -> Self {
        match err {
            IndexError::IndexEmpty => RecommendError::IndexEmpty,
            IndexError::DuplicateItem { id } => RecommendError::DuplicateItem { id },
            IndexError::Embedding(source) => RecommendError::Embedding { stage, source },
            source => RecommendError::Index { stage, source },
        }
    }
}

impl From<RankError> for RecommendError {
    fn from(err: RankError) -> Self {
        match err {
            RankError::InvalidK(k) => {
                RecommendError::invalid("k", format!("must be at least 1, got {k}"))
            }
            RankError::Index(err) => RecommendError::from_index("ranking", err),
        }
    }
}

impl From<IndexError> for RecommendError {
    fn from(err: IndexError) -> Self {
        RecommendError::from_index("indexing", err)
    }
}

/// Size and identity of the active index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub version: u64,
    pub items: usize,
    pub entries: usize,
    pub dimensions: usize,
    pub model: String,
}

pub struct Recommender {
    embedder: Arc<dyn Embedder>,
    index: ActiveIndex,
    ranker: Ranker,
    extractor: Option<Arc<dyn TextExtractor>>,
    max_k: usize,
    variants: Vec<EmbedVariant>,
    batch_size: usize,
}

impl Recommender {
    /// Serve `index`, which must have been built with `embedder`'s
    /// dimensionality.
    pub fn new(embedder: Arc<dyn Embedder>, index: CatalogIndex) -> Result<Self, RecommendError> {
        check_dimensions(embedder.as_ref(), &index)?;

        Ok(Self {
            embedder,
            index: ActiveIndex::new(index),
            ranker: Ranker::default(),
            extractor: None,
            max_k: DEFAULT_MAX_K,
            variants: vec![EmbedVariant::Full],
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_ranker(mut self, ranker: Ranker) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn with_extractor(mut self, extractor: Option<Arc<dyn TextExtractor>>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_max_k(mut self, max_k: usize) -> Self {
        self.max_k = max_k.max(1);
        self
    }

    /// Variants and batch size used by `rebuild`.
    pub fn with_index_options(mut self, variants: &[EmbedVariant], batch_size: usize) -> Self {
        if !variants.is_empty() {
            self.variants = variants.to_vec();
        }
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn max_k(&self) -> usize {
        self.max_k
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn recommend_text(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<RankedResult>, RecommendError> {
        self.recommend(&Query::new(text, k))
    }

    /// Rank the catalog against a free-text or URL query.
    pub fn recommend(&self, query: &Query) -> Result<Vec<RankedResult>, RecommendError> {
        let raw = query.text.trim();
        if raw.is_empty() {
            return Err(RecommendError::invalid("query", "must not be empty"));
        }

        if query.k == 0 || query.k > self.max_k {
            return Err(RecommendError::invalid(
                "k",
                format!("must be between 1 and {}, got {}", self.max_k, query.k),
            ));
        }

        let is_url = match query.kind {
            QueryKind::Auto => looks_like_url(raw),
            QueryKind::Text => false,
            QueryKind::Url => {
                if !looks_like_url(raw) {
                    return Err(RecommendError::invalid("query", format!("'{raw}' is not a URL")));
                }
                true
            }
        };

        let text = if is_url {
            self.extract(raw)?
        } else {
            raw.to_string()
        };

        let text = normalize_query(&text)
            .ok_or_else(|| RecommendError::invalid("query", "has no text to embed"))?;

        let vector = self
            .embedder
            .embed(&text)
            .map_err(|source| RecommendError::Embedding {
                stage: "embedding the query",
                source,
            })?;

        let snapshot = self.index.snapshot();
        let results = self.ranker.rank(&vector, snapshot.index.as_ref(), query.k)?;

        log::info!(
            "{} query ({} chars) -> {} results from index v{}",
            if is_url { "url" } else { "text" },
            text.chars().count(),
            results.len(),
            snapshot.version
        );

        Ok(results)
    }

    fn extract(&self, url: &str) -> Result<String, RecommendError> {
        let failed = |reason: String| RecommendError::ExtractionFailed {
            url: url.to_string(),
            reason,
        };

        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| failed("URL queries are not enabled".to_string()))?;

        let text = extractor.extract(url).map_err(|e| {
            log::warn!("extraction failed for {url}: {e}");
            failed(e.to_string())
        })?;

        if text.trim().is_empty() {
            return Err(failed("extractor returned no text".to_string()));
        }

        Ok(text)
    }

    /// Build a fresh index from `items` and publish it.
    ///
    /// On failure the current index keeps serving.
    pub fn rebuild(&self, items: Vec<CatalogItem>) -> Result<u64, RecommendError> {
        let index = CatalogIndex::builder(self.embedder.as_ref())
            .variants(&self.variants)
            .batch_size(self.batch_size)
            .build(items)
            .map_err(|e| RecommendError::from_index("rebuilding the index", e))?;

        Ok(self.index.swap(index))
    }

    /// Publish an already built index.
    pub fn swap_index(&self, index: CatalogIndex) -> Result<u64, RecommendError> {
        check_dimensions(self.embedder.as_ref(), &index)?;
        Ok(self.index.swap(index))
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.index.snapshot()
    }

    pub fn index_version(&self) -> u64 {
        self.index.version()
    }

    pub fn index_stats(&self) -> IndexStats {
        let snapshot = self.index.snapshot();
        IndexStats {
            version: snapshot.version,
            items: snapshot.index.item_count(),
            entries: snapshot.index.entry_count(),
            dimensions: snapshot.index.dimensions(),
            model: self.embedder.name().to_string(),
        }
    }
}

fn check_dimensions(embedder: &dyn Embedder, index: &CatalogIndex) -> Result<(), RecommendError> {
    if embedder.dimensions() != index.dimensions() {
        return Err(RecommendError::Index {
            stage: "loading the index",
            source: IndexError::DimensionMismatch {
                expected: embedder.dimensions(),
                got: index.dimensions(),
            },
        });
    }
    Ok(())
}
