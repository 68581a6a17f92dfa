use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::text::terms;
use crate::traits::Embedder;

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Offline embedder for tests and air-gapped runs. Terms follow the same
/// lowercase `\w+` rules as lexical retrieval; each distinct term adds
/// `1 + ln(tf)` to its hashed slot and the result is unit length.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for term in terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }
        let mut vector = vec![0f32; dims];
        for (term, tf) in &counts {
            vector[self.slot(term, dims)] += 1.0 + (*tf as f32).ln();
        }
        unit_length(&mut vector);
        vector
    }

    fn slot(&self, term: &str, dims: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        self.config.seed.hash(&mut hasher);
        term.hash(&mut hasher);
        (hasher.finish() % dims as u64) as usize
    }
}

impl Embedder for HashEmbedder {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn unit_length(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_are_unit_length_and_deterministic() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let a = embedder.embed_text("Quarterly revenue grew");
        let b = embedder.embed_text("quarterly REVENUE grew");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn punctuation_does_not_change_the_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert_eq!(
            embedder.embed_text("Revenue grew."),
            embedder.embed_text("(revenue) grew")
        );
    }

    #[test]
    fn shared_terms_score_higher_than_unrelated_text() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 256,
            seed: 7,
        });
        let query = embedder.embed_text("pump pressure");
        let related = embedder.embed_text("The pump pressure is ten bar.");
        let unrelated = embedder.embed_text("Staff wear blue uniforms.");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn repeated_terms_are_damped() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 4096,
            seed: 3,
        });
        let v = embedder.embed_text("bar bar bar pump");
        let mut weights: Vec<f32> = v.into_iter().filter(|x| *x > 0.0).collect();
        weights.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(weights.len(), 2);
        assert!((weights[1] / weights[0] - (1.0 + 3f32.ln())).abs() < 1e-4);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 1,
        });
        let v = embedder.embed_query("").unwrap();
        assert_eq!(v, vec![0.0; 8]);
    }
}
