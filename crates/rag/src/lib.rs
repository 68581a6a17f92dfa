pub mod answer;
pub mod context;
pub mod embedding;
pub mod gate;
pub mod ingest;
pub mod pipeline;
pub mod rerank;
pub mod retriever;
pub mod store;

pub use answer::{enhance_citations, extract_snippets, Answer, AnswerSynthesizer, Citation, Snippet};
pub use context::{ContextBuilder, UsedChunk, SYSTEM_PROMPT};
pub use embedding::{EmbeddingBackend, EmbeddingClient, OpenAiEmbeddingClient};
pub use gate::{evaluate, AbstainReason, GateDecision, ABSTAIN_TEXT};
pub use ingest::{IngestJob, IngestReport, StatusSink};
pub use pipeline::{namespace_for, AnswerOutcome, AnswerPipeline, AnswerRequest};
pub use rerank::{apply_rerank, LlmReranker};
pub use retriever::{
    bm25_scores, dedup_hits, rank_candidates, Hit, HybridRetriever, RetrievalMetrics,
    RetrievalResult,
};
pub use store::{DocumentStatus, RagStore, StatusRecord};
pub use citerag_llm::{LlmClient, LlmProvider};
