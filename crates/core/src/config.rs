use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;
use crate::tokens::TokenizerKind;

pub const DEFAULT_CONFIG: &str = "citerag.toml";

/// Every tunable of the pipeline. Built once and handed to each component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub gate: GateConfig,
    pub context: ContextConfig,
    pub answer: AnswerConfig,
    pub rerank: RerankConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    pub tokenizer: TokenizerKind,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            overlap_tokens: 100,
            tokenizer: TokenizerKind::Cl100k,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub top_k_final: usize,
    pub enable_bm25: bool,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub dedup_jaccard: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            top_k_final: 6,
            enable_bm25: true,
            vector_weight: 0.7,
            bm25_weight: 0.3,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            dedup_jaccard: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub sim_threshold_max: f32,
    pub sim_threshold_avg: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sim_threshold_max: 0.30,
            sim_threshold_avg: 0.26,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_context_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnswerConfig {
    pub citation_overlap: f32,
    pub snippet_overlap: f32,
    pub max_snippets: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            citation_overlap: 0.1,
            snippet_overlap: 0.3,
            max_snippets: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub batch_size: usize,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            batch_size: 512,
            dimensions: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads the file when it exists, then layers `CITERAG_*` variables on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    RagError::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&raw)?
            }
            None if Path::new(DEFAULT_CONFIG).exists() => {
                Self::from_toml_str(&fs::read_to_string(DEFAULT_CONFIG)?)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CITERAG_TOP_K") {
            self.retrieval.top_k = parse_var("CITERAG_TOP_K", &v)?;
        }
        if let Some(v) = lookup("CITERAG_TOP_K_FINAL") {
            self.retrieval.top_k_final = parse_var("CITERAG_TOP_K_FINAL", &v)?;
        }
        if let Some(v) = lookup("CITERAG_ENABLE_BM25") {
            self.retrieval.enable_bm25 = parse_bool(&v);
        }
        if let Some(v) = lookup("CITERAG_ENABLE_RERANK") {
            self.rerank.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("CITERAG_MAX_CONTEXT_TOKENS") {
            self.context.max_context_tokens = parse_var("CITERAG_MAX_CONTEXT_TOKENS", &v)?;
        }
        if let Some(v) = lookup("CITERAG_SIM_THRESHOLD_MAX") {
            self.gate.sim_threshold_max = parse_var("CITERAG_SIM_THRESHOLD_MAX", &v)?;
        }
        if let Some(v) = lookup("CITERAG_SIM_THRESHOLD_AVG") {
            self.gate.sim_threshold_avg = parse_var("CITERAG_SIM_THRESHOLD_AVG", &v)?;
        }
        if let Some(v) = lookup("CITERAG_CHUNK_TARGET_TOKENS") {
            self.chunking.target_tokens = parse_var("CITERAG_CHUNK_TARGET_TOKENS", &v)?;
        }
        if let Some(v) = lookup("CITERAG_CHUNK_OVERLAP_TOKENS") {
            self.chunking.overlap_tokens = parse_var("CITERAG_CHUNK_OVERLAP_TOKENS", &v)?;
        }
        if let Some(v) = lookup("CITERAG_EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Some(v) = lookup("CITERAG_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("CITERAG_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = lookup("CITERAG_LLM_MODEL") {
            self.llm.model = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.target_tokens == 0 {
            return Err(RagError::Config("chunking.target_tokens must be > 0".into()));
        }
        if self.retrieval.top_k == 0 || self.retrieval.top_k_final == 0 {
            return Err(RagError::Config(
                "retrieval.top_k and retrieval.top_k_final must be > 0".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RagError::Config(format!("invalid value for {key}: {raw}")))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunking.target_tokens, 800);
        assert_eq!(config.chunking.overlap_tokens, 100);
        assert_eq!(config.retrieval.bm25_k1, 1.2);
        assert_eq!(config.retrieval.bm25_b, 0.75);
        assert_eq!(config.retrieval.dedup_jaccard, 0.95);
        assert_eq!(config.answer.citation_overlap, 0.1);
        assert!(!config.rerank.enabled);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [retrieval]
            top_k = 20
            enable_bm25 = false

            [gate]
            sim_threshold_max = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 20);
        assert!(!config.retrieval.enable_bm25);
        assert_eq!(config.retrieval.top_k_final, 6);
        assert_eq!(config.gate.sim_threshold_max, 0.5);
        assert_eq!(config.gate.sim_threshold_avg, 0.26);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CITERAG_TOP_K", "3"),
            ("CITERAG_ENABLE_RERANK", "yes"),
            ("CITERAG_LLM_PROVIDER", "openai"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.rerank.enabled);
        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|key| (key == "CITERAG_TOP_K").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn zero_target_is_rejected() {
        let mut config = PipelineConfig::default();
        config.chunking.target_tokens = 0;
        assert!(config.validate().is_err());
    }
}
