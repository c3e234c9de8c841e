//! Retrieval and ranking for assessment recommendations.
//!
//! Embeds catalog text with fastembed-rs (or the offline hash embedder) and
//! searches an in-memory vector index by cosine similarity.
//!
//! # Architecture
//!
//! - `embeddings`: The `Embedder` capability and the fastembed wrapper
//! - `hash`: Feature-hashing embedder that needs no model files
//! - `preprocess`: Document and query text preparation
//! - `index`: Immutable in-memory vector index with exact search
//! - `ranker`: Over-fetch, deduplication and top-k truncation
//! - `active`: Versioned, atomically swapped index reference
//! - `storage`: Binary file I/O for vectors.bin persistence

mod active;
pub mod embeddings;
mod hash;
mod index;
mod preprocess;
mod ranker;
mod storage;

pub use active::{ActiveIndex, IndexSnapshot};
pub use embeddings::{
    load_embedder, model_id_hash, Embedder, Embedding, EmbeddingError, EmbeddingModel,
};
pub use hash::{HashEmbedder, DEFAULT_HASH_DIMENSIONS};
pub use index::{
    CatalogIndex, IndexBuilder, IndexEntry, IndexError, SearchHit, SearchIndex, DEFAULT_BATCH_SIZE,
};
pub use preprocess::{document_text, normalize_query, truncate_content, EmbedVariant};
pub use ranker::{RankError, RankedResult, Ranker, DEFAULT_MAX_CANDIDATES, DEFAULT_OVERFETCH_FACTOR};
pub use storage::{IndexInfo, IndexStorage, StorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
