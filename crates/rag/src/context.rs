use std::sync::Arc;

use citerag_core::Tokenizer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retriever::Hit;

pub const SYSTEM_PROMPT: &str = "You are a strict PDF QA assistant. Answer ONLY using the provided context.\n\
If the answer is not in the context, say you don't have enough information.\n\
Always cite sources as [page X] after the relevant sentence.";

/// A chunk that made it into the prompt context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedChunk {
    pub page: u32,
    pub chunk_id: String,
    pub text: String,
}

pub struct ContextBuilder {
    tokenizer: Arc<dyn Tokenizer>,
}

impl ContextBuilder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    /// Packs `[page P]` blocks in hit order and stops at the first block that
    /// would push the total past `max_tokens`.
    pub fn build_context(&self, hits: &[Hit], max_tokens: usize) -> (String, Vec<UsedChunk>) {
        let mut context = String::new();
        let mut used = Vec::new();
        let mut total = 0usize;
        for hit in hits {
            let block = format!("[page {}]\n{}\n\n", hit.chunk.page_start, hit.chunk.text);
            let cost = self.tokenizer.count_tokens(&block);
            if total + cost > max_tokens {
                break;
            }
            total += cost;
            context.push_str(&block);
            used.push(UsedChunk {
                page: hit.chunk.page_start,
                chunk_id: hit.chunk.chunk_id.clone(),
                text: hit.chunk.text.clone(),
            });
        }
        debug!(blocks = used.len(), tokens = total, "built context");
        (context, used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citerag_core::ChunkPayload;

    fn hit(id: &str, page: u32, text: &str) -> Hit {
        Hit {
            chunk: ChunkPayload {
                chunk_id: id.to_string(),
                text: text.to_string(),
                page_start: page,
                page_end: page,
                section: None,
            },
            score: 0.9,
        }
    }

    fn flat(cost: usize) -> ContextBuilder {
        ContextBuilder::new(Arc::new(move |_: &str| cost))
    }

    #[test]
    fn stops_before_block_that_overflows() {
        let hits = vec![hit("d:1:0", 1, "first"), hit("d:2:0", 2, "second")];
        let (context, used) = flat(40).build_context(&hits, 50);
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].chunk_id, "d:1:0");
        assert_eq!(context, "[page 1]\nfirst\n\n");
    }

    #[test]
    fn stops_at_first_overflow_even_if_later_blocks_fit() {
        let builder = ContextBuilder::new(Arc::new(|block: &str| {
            if block.contains("big") {
                100
            } else {
                5
            }
        }));
        let hits = vec![hit("a", 1, "small"), hit("b", 2, "big"), hit("c", 3, "tiny")];
        let (_, used) = builder.build_context(&hits, 50);
        let ids: Vec<&str> = used.iter().map(|u| u.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn blocks_use_page_start() {
        let mut wide = hit("d:3:0", 3, "spans pages");
        wide.chunk.page_end = 4;
        let (context, used) = flat(1).build_context(&[wide], 10);
        assert!(context.starts_with("[page 3]\n"));
        assert_eq!(used[0].page, 3);
    }

    #[test]
    fn no_hits_yield_empty_context() {
        let (context, used) = flat(1).build_context(&[], 10);
        assert!(context.is_empty());
        assert!(used.is_empty());
    }
}
