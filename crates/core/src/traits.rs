//! Capabilities the pipeline consumes. Concrete implementations are picked
//! when the pipeline is constructed.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::{RagError, Result};
use crate::page::{ParseMeta, ParsedPage};

pub trait Parser: Send + Sync {
    /// Fails with [`RagError::Parsing`] when no page carries text.
    fn parse(&self, path: &Path) -> Result<(Vec<ParsedPage>, ParseMeta)>;
}

pub trait Embedder: Send + Sync {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::Other("embedder returned no vector".into()))
    }
}

pub trait VectorStore: Send + Sync {
    fn upsert(&self, namespace: &str, points: &[VectorPoint]) -> Result<()>;
    /// Nearest neighbours, best first, at most `k`.
    fn search(&self, namespace: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>>;
    fn delete_namespace(&self, namespace: &str) -> Result<()>;
}

pub trait Generator: Send + Sync {
    fn generate(&self, system: &str, user: &str) -> Result<String>;
}

pub trait Reranker: Send + Sync {
    /// One score per text, in input order.
    fn score(&self, question: &str, texts: &[String]) -> Result<Vec<f32>>;
}

/// What the vector store keeps next to each vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkPayload {
    pub chunk_id: String,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    #[serde(default)]
    pub section: Option<String>,
}

impl From<&Chunk> for ChunkPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            section: chunk.section.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}
