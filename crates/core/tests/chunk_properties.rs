use std::sync::Arc;

use citerag_core::{
    split_sentences, ChunkType, Chunker, ChunkingConfig, ParsedPage, Tokenizer,
};
use proptest::prelude::*;

const TABLE: &str = "| region | total |\n| north | 12 |";

fn word_tokenizer() -> Arc<dyn Tokenizer> {
    Arc::new(|text: &str| text.split_whitespace().count())
}

#[derive(Clone, Debug)]
enum Para {
    Prose(Vec<String>),
    Table,
}

impl Para {
    fn render(&self) -> String {
        match self {
            Para::Prose(sentences) => sentences.join(" "),
            Para::Table => TABLE.to_string(),
        }
    }
}

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 1..9).prop_map(|words| format!("{}.", words.join(" ")))
}

fn paragraph() -> impl Strategy<Value = Para> {
    prop_oneof![
        4 => prop::collection::vec(sentence(), 1..6).prop_map(Para::Prose),
        1 => Just(Para::Table),
    ]
}

fn page() -> impl Strategy<Value = Vec<Para>> {
    prop::collection::vec(paragraph(), 0..6)
}

proptest! {
    #[test]
    fn every_sentence_is_owned_by_exactly_one_chunk(
        pages in prop::collection::vec(page(), 1..4),
        target in 1usize..30,
        overlap in 0usize..10,
    ) {
        let config = ChunkingConfig {
            target_tokens: target,
            overlap_tokens: overlap,
            ..ChunkingConfig::default()
        };
        let chunker = Chunker::new(config, word_tokenizer());
        let parsed: Vec<ParsedPage> = pages
            .iter()
            .enumerate()
            .map(|(idx, paras)| {
                let text = paras.iter().map(Para::render).collect::<Vec<_>>().join("\n\n");
                ParsedPage::new(idx as u32 + 1, text)
            })
            .collect();

        let (chunks, stats) = chunker.chunk_pages("doc", &parsed);
        prop_assert_eq!(stats.chunks, chunks.len());

        let mut expected = Vec::new();
        for paras in &pages {
            for para in paras {
                match para {
                    Para::Prose(sentences) => expected.extend(sentences.iter().cloned()),
                    Para::Table => expected.push(TABLE.to_string()),
                }
            }
        }

        let mut seen = Vec::new();
        for chunk in &chunks {
            prop_assert!(!chunk.text.trim().is_empty());
            prop_assert_eq!(chunk.page_start, chunk.page_end);
            if chunk.chunk_type == ChunkType::Table {
                prop_assert_eq!(chunk.text.as_str(), TABLE);
                prop_assert_eq!(chunk.overlap_len, 0);
                seen.push(chunk.text.clone());
            } else {
                prop_assert!(!chunk.text.contains('|'));
                seen.extend(split_sentences(chunk.owned_text()).into_iter().map(str::to_string));
            }
        }
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn chunk_ids_are_unique_and_stable(pages in prop::collection::vec(page(), 1..4)) {
        let chunker = Chunker::new(ChunkingConfig { target_tokens: 6, ..ChunkingConfig::default() }, word_tokenizer());
        let parsed: Vec<ParsedPage> = pages
            .iter()
            .enumerate()
            .map(|(idx, paras)| {
                let text = paras.iter().map(Para::render).collect::<Vec<_>>().join("\n\n");
                ParsedPage::new(idx as u32 + 1, text)
            })
            .collect();
        let (first, _) = chunker.chunk_pages("doc", &parsed);
        let (second, _) = chunker.chunk_pages("doc", &parsed);
        prop_assert_eq!(&first, &second);
        let ids: std::collections::HashSet<_> = first.iter().map(|c| c.id.clone()).collect();
        prop_assert_eq!(ids.len(), first.len());
    }
}

#[test]
fn repeated_greeting_page_chunks_with_real_tokenizer() {
    let chunker = Chunker::from_config(ChunkingConfig {
        target_tokens: 800,
        ..ChunkingConfig::default()
    })
    .unwrap();
    let page = ParsedPage::new(1, "Hello world. This is a test document. ".repeat(50));
    let (chunks, stats) = chunker.chunk_pages("doc123", &[page]);
    assert!(!chunks.is_empty());
    assert_eq!(stats.chunks, chunks.len());
    assert!(chunks.iter().all(|c| c.page_start == 1 && c.page_end == 1));
    assert!(chunks.iter().all(|c| c.id.starts_with("doc123:1:")));
}
