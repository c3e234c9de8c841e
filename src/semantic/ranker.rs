//! Turns raw index hits into a deduplicated top-k list.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::CatalogItem;
use crate::semantic::index::{IndexError, SearchHit, SearchIndex};

/// Candidates fetched per requested result.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 3;

/// Upper bound on the first candidate pool.
pub const DEFAULT_MAX_CANDIDATES: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("k must be at least 1, got {0}")]
    InvalidK(usize),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// One recommended item and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub item: CatalogItem,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Ranker {
    overfetch_factor: usize,
    max_candidates: usize,
    min_score: Option<f32>,
}

impl Default for Ranker {
    fn default() -> Self {
        Self {
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            min_score: None,
        }
    }
}

impl Ranker {
    pub fn new(overfetch_factor: usize, max_candidates: usize) -> Self {
        Self {
            overfetch_factor: overfetch_factor.max(1),
            max_candidates: max_candidates.max(1),
            min_score: None,
        }
    }

    /// Drop results scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// First candidate pool size for `k` results.
    fn pool_size(&self, k: usize) -> usize {
        k.saturating_mul(self.overfetch_factor)
            .clamp(k, self.max_candidates.max(k))
    }

    /// Rank the catalog against `query`.
    ///
    /// Results are distinct by item id, sorted by score descending with ties
    /// in ascending id order. When deduplication leaves fewer than `k` items
    /// the pool is doubled until it covers every entry, so `k` beyond the
    /// catalog size yields every item and a smaller `k` always yields a
    /// prefix of a larger one.
    pub fn rank(
        &self,
        query: &[f32],
        index: &dyn SearchIndex,
        k: usize,
    ) -> Result<Vec<RankedResult>, RankError> {
        if k == 0 {
            return Err(RankError::InvalidK(k));
        }

        let total = index.entry_count();
        let mut pool = self.pool_size(k);

        let best = loop {
            let hits = index.search(query, pool)?;
            let best = dedup_by_id(hits);

            if best.len() >= k || pool >= total {
                break best;
            }

            log::debug!(
                "pool of {pool} yielded {} distinct items, widening",
                best.len()
            );
            pool = pool.saturating_mul(2).min(total);
        };

        let results = best
            .into_iter()
            .filter(|hit| self.min_score.map_or(true, |min| hit.score >= min))
            .take(k)
            .filter_map(|hit| {
                index.item(&hit.id).map(|item| RankedResult {
                    item: item.clone(),
                    score: hit.score,
                })
            })
            .collect();

        Ok(results)
    }
}

/// Keep the best-scoring hit per id, ordered by score then id.
fn dedup_by_id(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut best: HashMap<String, f32> = HashMap::with_capacity(hits.len());

    for hit in hits {
        best.entry(hit.id)
            .and_modify(|score| {
                if hit.score > *score {
                    *score = hit.score;
                }
            })
            .or_insert(hit.score);
    }

    let mut deduped = best
        .into_iter()
        .map(|(id, score)| SearchHit { id, score })
        .collect::<Vec<_>>();

    deduped.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    deduped
}
