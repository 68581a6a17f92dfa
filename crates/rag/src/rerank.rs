use std::sync::Arc;

use citerag_core::{Generator, Result, Reranker};
use tracing::{debug, warn};

use crate::retriever::Hit;

const SCORE_PROMPT: &str =
    "Score 0–5 how well the snippet answers the question. Reply with a number only.";

/// Asks the generator for one relevance score per snippet.
pub struct LlmReranker {
    generator: Arc<dyn Generator>,
}

impl LlmReranker {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

impl Reranker for LlmReranker {
    fn score(&self, question: &str, texts: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(texts.len());
        for text in texts {
            let prompt = format!("{SCORE_PROMPT}\nQuestion: {question}\nSnippet: {text}");
            let reply = self.generator.generate("", &prompt)?;
            scores.push(parse_score(&reply));
        }
        Ok(scores)
    }
}

/// Unparsable replies score 0.
fn parse_score(reply: &str) -> f32 {
    reply
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Reorders `hits` by reranker score, keeping the incoming order on ties and
/// on any reranker failure. The result holds at most `k_final` hits.
pub fn apply_rerank(
    reranker: &dyn Reranker,
    question: &str,
    hits: Vec<Hit>,
    k_final: usize,
) -> Vec<Hit> {
    let texts: Vec<String> = hits.iter().map(|h| h.chunk.text.clone()).collect();
    let mut hits = match reranker.score(question, &texts) {
        Ok(scores) if scores.len() == hits.len() => {
            let mut scored: Vec<(f32, Hit)> = scores.into_iter().zip(hits).collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            debug!(count = scored.len(), "reranked hits");
            scored.into_iter().map(|(_, hit)| hit).collect()
        }
        Ok(scores) => {
            warn!(
                expected = hits.len(),
                got = scores.len(),
                "reranker returned wrong number of scores; keeping retrieval order"
            );
            hits
        }
        Err(err) => {
            warn!(error = %err, "reranker failed; keeping retrieval order");
            hits
        }
    };
    hits.truncate(k_final);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use citerag_core::{ChunkPayload, RagError};

    fn hit(id: &str) -> Hit {
        Hit {
            chunk: ChunkPayload {
                chunk_id: id.to_string(),
                text: format!("text of {id}"),
                page_start: 1,
                page_end: 1,
                section: None,
            },
            score: 0.5,
        }
    }

    fn ids(hits: &[Hit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect()
    }

    struct Fixed(Result<Vec<f32>>);

    impl Reranker for Fixed {
        fn score(&self, _question: &str, _texts: &[String]) -> Result<Vec<f32>> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(_) => Err(RagError::Other("scorer down".into())),
            }
        }
    }

    #[test]
    fn sorts_descending_with_stable_ties() {
        let hits = vec![hit("a"), hit("b"), hit("c"), hit("d")];
        let reranker = Fixed(Ok(vec![1.0, 3.0, 1.0, 3.0]));
        let out = apply_rerank(&reranker, "q", hits, 3);
        assert_eq!(ids(&out), vec!["b", "d", "a"]);
    }

    #[test]
    fn failure_keeps_incoming_order() {
        let hits = vec![hit("a"), hit("b")];
        let reranker = Fixed(Err(RagError::Other(String::new())));
        assert_eq!(ids(&apply_rerank(&reranker, "q", hits, 5)), vec!["a", "b"]);
    }

    #[test]
    fn length_mismatch_keeps_incoming_order() {
        let hits = vec![hit("a"), hit("b"), hit("c")];
        let reranker = Fixed(Ok(vec![0.0, 5.0]));
        assert_eq!(ids(&apply_rerank(&reranker, "q", hits, 2)), vec!["a", "b"]);
    }

    struct ScriptedGenerator;

    impl Generator for ScriptedGenerator {
        fn generate(&self, _system: &str, user: &str) -> Result<String> {
            if user.contains("Snippet: good") {
                Ok(" 4.5\n".to_string())
            } else {
                Ok("not sure".to_string())
            }
        }
    }

    #[test]
    fn llm_replies_are_parsed_as_scores() {
        let reranker = LlmReranker::new(Arc::new(ScriptedGenerator));
        let scores = reranker
            .score("why?", &["good".to_string(), "bad".to_string()])
            .unwrap();
        assert_eq!(scores, vec![4.5, 0.0]);
    }
}
