mod chunk;
mod config;
mod embedding;
mod error;
mod page;
mod parser;
pub mod retry;
mod text;
mod tokens;
mod traits;

pub use chunk::{
    chunk_id, classify_paragraph, split_paragraphs, Chunk, ChunkStats, ChunkType, Chunker,
};
pub use config::{
    AnswerConfig, ChunkingConfig, ContextConfig, EmbeddingConfig, GateConfig, LlmConfig,
    PipelineConfig, RerankConfig, RetrievalConfig, DEFAULT_CONFIG,
};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{RagError, Result};
pub use page::{Block, ParseMeta, ParsedPage};
pub use parser::{text_to_pages, FileParser};
pub use retry::{classify_status, status_error, FailureKind, RetryPolicy};
pub use text::{jaccard, overlap_ratio, split_sentences, terms, word_set};
pub use tokens::{BpeTokenizer, Tokenizer, TokenizerKind};
pub use traits::{
    ChunkPayload, Embedder, Generator, Parser, Reranker, ScoredPoint, VectorPoint, VectorStore,
};
