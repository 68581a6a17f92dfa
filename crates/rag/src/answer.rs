use std::collections::HashSet;
use std::sync::Arc;

use citerag_core::{overlap_ratio, split_sentences, word_set, AnswerConfig, Generator, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::UsedChunk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub page: u32,
    pub chunk_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippets: Option<Vec<Snippet>>,
    pub confidence: f32,
}

impl Answer {
    /// The fixed reply used when retrieval evidence is too weak.
    pub fn abstained(text: &str) -> Self {
        Self {
            text: text.to_string(),
            citations: Vec::new(),
            snippets: None,
            confidence: 0.0,
        }
    }
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    config: AnswerConfig,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: AnswerConfig) -> Self {
        Self { generator, config }
    }

    pub fn generate_answer(
        &self,
        question: &str,
        system_prompt: &str,
        context: &str,
        used: &[UsedChunk],
        quote_mode: bool,
    ) -> Result<Answer> {
        let user = format!("Question: {question}\n\nContext:\n{context}");
        let raw = self.generator.generate(system_prompt, &user)?;
        let snippets = quote_mode.then(|| {
            extract_snippets(
                &raw,
                used,
                self.config.snippet_overlap,
                self.config.max_snippets,
            )
        });
        let text = enhance_citations(&raw, used, self.config.citation_overlap);
        debug!(
            used = used.len(),
            snippets = snippets.as_ref().map_or(0, Vec::len),
            "synthesized answer"
        );
        Ok(Answer {
            text,
            citations: used
                .iter()
                .map(|u| Citation {
                    page: u.page,
                    chunk_id: u.chunk_id.clone(),
                })
                .collect(),
            snippets,
            confidence: 0.0,
        })
    }
}

/// Appends ` [page P]` to every sentence that lacks a page marker and shares
/// more than `threshold` of its words with some used chunk. The earliest chunk
/// wins when two overlap equally.
pub fn enhance_citations(text: &str, used: &[UsedChunk], threshold: f32) -> String {
    let chunk_words: Vec<HashSet<String>> = used.iter().map(|u| word_set(&u.text)).collect();
    let sentences: Vec<String> = split_sentences(text)
        .into_iter()
        .map(|sentence| {
            if sentence.contains("[page") {
                return sentence.to_string();
            }
            let words = word_set(sentence);
            let mut best: Option<(f32, u32)> = None;
            for (chunk, words_in_chunk) in used.iter().zip(&chunk_words) {
                let ratio = overlap_ratio(&words, words_in_chunk);
                if best.map_or(true, |(top, _)| ratio > top) {
                    best = Some((ratio, chunk.page));
                }
            }
            match best {
                Some((ratio, page)) if ratio > threshold => format!("{sentence} [page {page}]"),
                _ => sentence.to_string(),
            }
        })
        .collect();
    sentences.join(" ")
}

/// Answer sentences that are well supported by a used chunk, most relevant
/// first, without case-insensitive repeats.
pub fn extract_snippets(
    text: &str,
    used: &[UsedChunk],
    threshold: f32,
    limit: usize,
) -> Vec<Snippet> {
    let sentences = split_sentences(text);
    let mut candidates: Vec<(f32, Snippet)> = Vec::new();
    for chunk in used {
        let chunk_words = word_set(&chunk.text);
        for sentence in &sentences {
            let ratio = overlap_ratio(&word_set(sentence), &chunk_words);
            if ratio > threshold {
                candidates.push((
                    ratio,
                    Snippet {
                        page: chunk.page,
                        text: sentence.to_string(),
                    },
                ));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|(_, snippet)| seen.insert(snippet.text.trim().to_lowercase()))
        .map(|(_, snippet)| snippet)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn used(page: u32, id: &str, text: &str) -> UsedChunk {
        UsedChunk {
            page,
            chunk_id: id.to_string(),
            text: text.to_string(),
        }
    }

    struct Echo {
        reply: String,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl Generator for Echo {
        fn generate(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn existing_page_markers_are_untouched() {
        let chunks = [used(2, "d:2:0", "the reactor runs hot")];
        let out = enhance_citations("The reactor runs hot [page 7].", &chunks, 0.1);
        assert_eq!(out, "The reactor runs hot [page 7].");
    }

    #[test]
    fn unrelated_sentences_stay_uncited() {
        let chunks = [used(2, "d:2:0", "the reactor runs hot")];
        let out = enhance_citations("Bananas are yellow.", &chunks, 0.1);
        assert_eq!(out, "Bananas are yellow.");
    }

    #[test]
    fn best_overlapping_chunk_is_cited() {
        let chunks = [
            used(1, "d:1:0", "coolant flows through pipes"),
            used(4, "d:4:0", "the reactor core runs hot"),
        ];
        let out = enhance_citations(
            "The reactor core runs hot. Coolant flows fast!  ",
            &chunks,
            0.1,
        );
        assert_eq!(out, "The reactor core runs hot. [page 4] Coolant flows fast! [page 1]");
    }

    #[test]
    fn earliest_chunk_wins_ties() {
        let chunks = [used(3, "a", "alpha beta"), used(9, "b", "alpha beta")];
        let out = enhance_citations("alpha beta gamma", &chunks, 0.1);
        assert_eq!(out, "alpha beta gamma [page 3]");
    }

    #[test]
    fn snippets_are_ranked_deduplicated_and_limited() {
        let chunks = [
            used(1, "a", "solar output rose sharply in march"),
            used(2, "b", "Solar output rose sharply"),
        ];
        let text = "Solar output rose sharply. Nothing else matters here. solar OUTPUT rose sharply.";
        let snippets = extract_snippets(text, &chunks, 0.3, 5);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].text, "Solar output rose sharply.");
        assert_eq!(snippets[0].page, 1);
        assert!(extract_snippets(text, &chunks, 0.3, 0).is_empty());
    }

    #[test]
    fn synthesizer_builds_prompt_and_lists_used_chunks() {
        let generator = Arc::new(Echo {
            reply: "Output rose in march.".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let synthesizer = AnswerSynthesizer::new(generator.clone(), AnswerConfig::default());
        let chunks = [
            used(5, "d:5:0", "output rose in march"),
            used(6, "d:6:0", "unrelated"),
        ];
        let answer = synthesizer
            .generate_answer("When?", "sys", "CTX", &chunks, true)
            .unwrap();
        assert_eq!(answer.text, "Output rose in march. [page 5]");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[1].chunk_id, "d:6:0");
        assert_eq!(answer.confidence, 0.0);
        assert_eq!(answer.snippets.as_ref().map(Vec::len), Some(1));

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0].0, "sys");
        assert_eq!(prompts[0].1, "Question: When?\n\nContext:\nCTX");
    }

    #[test]
    fn citations_serialize_with_camel_case_ids() {
        let json = serde_json::to_value(Citation {
            page: 2,
            chunk_id: "d:2:0".into(),
        })
        .unwrap();
        assert_eq!(json["chunkId"], "d:2:0");
    }
}
