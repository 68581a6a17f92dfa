use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use citerag_core::{
    jaccard, terms, word_set, ChunkPayload, Embedder, Result, RetrievalConfig, ScoredPoint,
    VectorStore,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub chunk: ChunkPayload,
    pub score: f32,
}

/// Evidence strength over the whole candidate pool, before dedup and truncation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalMetrics {
    pub max_sim: f32,
    pub avg_top3: f32,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<Hit>,
    pub metrics: RetrievalMetrics,
}

pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub fn search(
        &self,
        query: &str,
        namespace: &str,
        k: usize,
        k_final: usize,
    ) -> Result<RetrievalResult> {
        let query_vector = self.embedder.embed_query(query)?;
        let raw = self.store.search(namespace, &query_vector, k)?;
        let result = rank_candidates(query, raw, k_final, &self.config);
        debug!(
            namespace,
            pool = k,
            kept = result.hits.len(),
            max_sim = result.metrics.max_sim,
            avg_top3 = result.metrics.avg_top3,
            "retrieved candidates"
        );
        Ok(result)
    }
}

/// Scores, measures, dedups and truncates a vector-store candidate pool that
/// arrives in retrieval order.
pub fn rank_candidates(
    query: &str,
    raw: Vec<ScoredPoint>,
    k_final: usize,
    config: &RetrievalConfig,
) -> RetrievalResult {
    let vector_scores: Vec<f32> = raw.iter().map(|p| p.score).collect();
    let scores = if config.enable_bm25 && !raw.is_empty() {
        let texts: Vec<&str> = raw.iter().map(|p| p.payload.text.as_str()).collect();
        let lexical = normalize_by_max(bm25_scores(query, &texts, config.bm25_k1, config.bm25_b));
        vector_scores
            .iter()
            .zip(lexical.iter())
            .map(|(vs, bs)| config.vector_weight * vs + config.bm25_weight * bs)
            .collect()
    } else {
        vector_scores
    };

    let max_sim = scores.iter().copied().fold(None, |acc: Option<f32>, s| {
        Some(acc.map_or(s, |m| m.max(s)))
    });
    let top = &scores[..scores.len().min(3)];
    let avg_top3 = if top.is_empty() {
        0.0
    } else {
        top.iter().sum::<f32>() / top.len() as f32
    };

    let mut ordered: Vec<Hit> = raw
        .into_iter()
        .zip(scores)
        .map(|(point, score)| Hit {
            chunk: point.payload,
            score,
        })
        .collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let hits = dedup_hits(ordered, config.dedup_jaccard, k_final);
    RetrievalResult {
        metrics: RetrievalMetrics {
            max_sim: max_sim.unwrap_or(0.0),
            avg_top3,
            k: hits.len(),
        },
        hits,
    }
}

/// Keeps a hit unless its token set is more than `threshold` Jaccard-similar
/// to one already kept; stops once `limit` hits survive.
pub fn dedup_hits(ordered: Vec<Hit>, threshold: f32, limit: usize) -> Vec<Hit> {
    let mut kept: Vec<Hit> = Vec::new();
    let mut kept_sets: Vec<HashSet<String>> = Vec::new();
    for hit in ordered {
        if kept.len() >= limit {
            break;
        }
        let words = word_set(&hit.chunk.text);
        if kept_sets.iter().any(|seen| jaccard(&words, seen) > threshold) {
            continue;
        }
        kept_sets.push(words);
        kept.push(hit);
    }
    kept
}

/// BM25 with document frequency and average length taken from `texts` alone.
pub fn bm25_scores(query: &str, texts: &[&str], k1: f32, b: f32) -> Vec<f32> {
    let query_terms = terms(query);
    let doc_terms: Vec<Vec<String>> = texts.iter().map(|t| terms(t)).collect();
    let doc_lengths: Vec<usize> = texts.iter().map(|t| t.split_whitespace().count()).collect();
    let total_docs = texts.len() as f32;
    let avg_doc_length = if texts.is_empty() {
        0.0
    } else {
        doc_lengths.iter().sum::<usize>() as f32 / total_docs
    };

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for terms in &doc_terms {
        let unique: HashSet<&str> = terms.iter().map(String::as_str).collect();
        for term in unique {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }

    doc_terms
        .iter()
        .zip(doc_lengths.iter())
        .map(|(terms, &doc_length)| {
            if query_terms.is_empty() || terms.is_empty() || avg_doc_length == 0.0 {
                return 0.0;
            }
            let mut score = 0.0f32;
            for term in &query_terms {
                let tf = terms.iter().filter(|t| *t == term).count() as f32;
                if tf == 0.0 {
                    continue;
                }
                let df = *doc_freq.get(term.as_str()).unwrap_or(&0) as f32;
                if df == 0.0 {
                    continue;
                }
                let idf = ((total_docs - df + 0.5) / (df + 0.5)).ln();
                let norm = 1.0 - b + b * (doc_length as f32 / avg_doc_length);
                score += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
            score
        })
        .collect()
}

/// Divides by the pool maximum; left untouched when that maximum is not positive.
fn normalize_by_max(scores: Vec<f32>) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max > 0.0 {
        scores.into_iter().map(|s| s / max).collect()
    } else {
        scores
    }
}
