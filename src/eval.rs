//! Offline ranking-quality evaluation against labeled queries.
//!
//! Relevance is binary: a recommended item counts when its name or id is in
//! the query's `relevant` list.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::recommender::{Query, Recommender};

/// One labeled query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledQuery {
    pub query: String,
    /// Names or ids of the items a good answer contains
    pub relevant: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryScore {
    pub query: String,
    pub recommended: Vec<String>,
    pub recall: f64,
    pub average_precision: f64,
    pub ndcg: f64,
    /// Set when the recommender failed for this query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub k: usize,
    pub queries: Vec<QueryScore>,
    pub mean_recall: f64,
    pub map: f64,
    pub mean_ndcg: f64,
}

/// Load labeled queries from a JSON or YAML file (picked by extension).
pub fn load_queries(path: &Path) -> anyhow::Result<Vec<LabeledQuery>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    let queries: Vec<LabeledQuery> = match ext.as_str() {
        "yaml" | "yml" => serde_yml::from_str(&data).context("queries file is malformed")?,
        _ => serde_json::from_str(&data).context("queries file is malformed")?,
    };

    if queries.is_empty() {
        bail!("{} has no queries", path.display());
    }

    Ok(queries)
}

fn is_relevant(item: &str, relevant: &[String]) -> bool {
    relevant.iter().any(|r| r == item)
}

/// Share of relevant items found in the first `k` recommendations.
pub fn recall_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }

    let hits = recommended
        .iter()
        .take(k)
        .filter(|item| is_relevant(item, relevant))
        .count();

    hits as f64 / relevant.len() as f64
}

/// Precision averaged over hit positions, normalized by `min(|relevant|, k)`.
pub fn average_precision_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
    if relevant.is_empty() || k == 0 {
        return 0.0;
    }

    let mut hits = 0;
    let mut score = 0.0;
    for (i, item) in recommended.iter().take(k).enumerate() {
        if is_relevant(item, relevant) {
            hits += 1;
            score += hits as f64 / (i + 1) as f64;
        }
    }

    score / relevant.len().min(k) as f64
}

/// Binary-relevance NDCG with a log2 position discount.
pub fn ndcg_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
    let discount = |i: usize| 1.0 / ((i + 2) as f64).log2();

    let dcg: f64 = recommended
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, item)| is_relevant(item, relevant))
        .map(|(i, _)| discount(i))
        .sum();

    let ideal: f64 = (0..relevant.len().min(k)).map(discount).sum();

    if ideal == 0.0 {
        0.0
    } else {
        dcg / ideal
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Run every query at `k` and score the results.
///
/// A failed query scores zero and keeps its error in the report.
pub fn evaluate(recommender: &Recommender, queries: &[LabeledQuery], k: usize) -> EvalReport {
    let scores = queries
        .iter()
        .map(|labeled| match recommender.recommend(&Query::new(labeled.query.clone(), k)) {
            Ok(results) => {
                // match on either name or id
                let recommended = results
                    .iter()
                    .map(|r| {
                        if is_relevant(&r.item.id, &labeled.relevant) {
                            r.item.id.clone()
                        } else {
                            r.item.name.clone()
                        }
                    })
                    .collect::<Vec<_>>();

                QueryScore {
                    query: labeled.query.clone(),
                    recall: recall_at_k(&recommended, &labeled.relevant, k),
                    average_precision: average_precision_at_k(&recommended, &labeled.relevant, k),
                    ndcg: ndcg_at_k(&recommended, &labeled.relevant, k),
                    recommended,
                    error: None,
                }
            }
            Err(e) => {
                log::warn!("evaluation query failed: {e}");
                QueryScore {
                    query: labeled.query.clone(),
                    recommended: vec![],
                    recall: 0.0,
                    average_precision: 0.0,
                    ndcg: 0.0,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect::<Vec<_>>();

    EvalReport {
        k,
        mean_recall: mean(scores.iter().map(|s| s.recall)),
        map: mean(scores.iter().map(|s| s.average_precision)),
        mean_ndcg: mean(scores.iter().map(|s| s.ndcg)),
        queries: scores,
    }
}
