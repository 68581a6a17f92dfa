use std::sync::Arc;

use citerag_core::{
    Embedder, Generator, PipelineConfig, RagError, Reranker, Result, Tokenizer, VectorStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::answer::{Answer, AnswerSynthesizer};
use crate::context::ContextBuilder;
use crate::gate::{evaluate, AbstainReason, GateDecision, ABSTAIN_TEXT};
use crate::rerank::apply_rerank;
use crate::retriever::{HybridRetriever, RetrievalMetrics};

/// Vector-store namespace holding a document's chunks.
pub fn namespace_for(doc_id: &str) -> String {
    format!("doc_{}", doc_id.replace('-', "_"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question: String,
    pub doc_id: String,
    /// Overrides the configured candidate pool size when set and non-zero.
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub quote_mode: bool,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            doc_id: doc_id.into(),
            top_k: None,
            quote_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered {
        answer: Answer,
        metrics: RetrievalMetrics,
    },
    Abstained {
        answer: Answer,
        metrics: RetrievalMetrics,
        reason: AbstainReason,
    },
}

impl AnswerOutcome {
    pub fn answer(&self) -> &Answer {
        match self {
            AnswerOutcome::Answered { answer, .. } | AnswerOutcome::Abstained { answer, .. } => {
                answer
            }
        }
    }

    pub fn metrics(&self) -> &RetrievalMetrics {
        match self {
            AnswerOutcome::Answered { metrics, .. } | AnswerOutcome::Abstained { metrics, .. } => {
                metrics
            }
        }
    }

    pub fn is_abstained(&self) -> bool {
        matches!(self, AnswerOutcome::Abstained { .. })
    }
}

/// Question answering over one ingested document: retrieve, gate, optionally
/// rerank, pack context, generate and cite.
pub struct AnswerPipeline {
    config: PipelineConfig,
    retriever: HybridRetriever,
    context: ContextBuilder,
    synthesizer: AnswerSynthesizer,
    reranker: Option<Arc<dyn Reranker>>,
}

impl AnswerPipeline {
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            retriever: HybridRetriever::new(embedder, store, config.retrieval),
            context: ContextBuilder::new(tokenizer),
            synthesizer: AnswerSynthesizer::new(generator, config.answer),
            reranker: None,
            config,
        }
    }

    /// Installs a reranker; it only runs when `rerank.enabled` is set.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn answer(&self, request: &AnswerRequest) -> Result<AnswerOutcome> {
        if request.question.trim().is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".into()));
        }
        let namespace = namespace_for(&request.doc_id);
        let k = request
            .top_k
            .filter(|k| *k > 0)
            .unwrap_or(self.config.retrieval.top_k);
        let k_final = self.config.retrieval.top_k_final;
        let retrieved = self
            .retriever
            .search(&request.question, &namespace, k, k_final)?;
        let metrics = retrieved.metrics;

        if let GateDecision::Abstain(reason) = evaluate(&metrics, &self.config.gate) {
            warn!(
                doc_id = %request.doc_id,
                max_sim = metrics.max_sim,
                avg_top3 = metrics.avg_top3,
                ?reason,
                "abstaining on weak retrieval evidence"
            );
            return Ok(AnswerOutcome::Abstained {
                answer: Answer::abstained(ABSTAIN_TEXT),
                metrics,
                reason,
            });
        }

        let hits = match (&self.reranker, self.config.rerank.enabled) {
            (Some(reranker), true) => {
                apply_rerank(reranker.as_ref(), &request.question, retrieved.hits, k_final)
            }
            _ => retrieved.hits,
        };

        let (context, used) = self
            .context
            .build_context(&hits, self.config.context.max_context_tokens);
        let answer = self.synthesizer.generate_answer(
            &request.question,
            self.context.system_prompt(),
            &context,
            &used,
            request.quote_mode,
        )?;
        info!(
            doc_id = %request.doc_id,
            hits = hits.len(),
            used = used.len(),
            "answered question"
        );
        Ok(AnswerOutcome::Answered { answer, metrics })
    }
}
