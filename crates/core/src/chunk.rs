use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::page::ParsedPage;
use crate::text::split_sentences;
use crate::tokens::{BpeTokenizer, Tokenizer};

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").expect("regex"));
static TABLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\|\s*[^|]+\s*\|", // pipe-delimited columns
        r"\+[-=]+\+",       // ascii box borders
        r"\t+",             // tab runs
        r"\s{3,}",          // aligned columns
    ]
    .iter()
    .map(|p| Regex::new(p).expect("regex"))
    .collect()
});
static TRAILING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+$").expect("regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Table,
    Caption,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Table => "table",
            ChunkType::Caption => "caption",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub page_start: u32,
    pub page_end: u32,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub text: String,
    /// Byte length of the leading sentence carried over from the previous chunk.
    #[serde(default)]
    pub overlap_len: usize,
}

impl Chunk {
    /// Text this chunk contributes on its own, without the carried-over sentence.
    pub fn owned_text(&self) -> &str {
        self.text[self.overlap_len..].trim_start()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkStats {
    pub chunks: usize,
    pub type_breakdown: BTreeMap<ChunkType, usize>,
    pub avg_chunk_tokens: f32,
}

/// Classifies one paragraph of page text.
pub fn classify_paragraph(text: &str) -> ChunkType {
    if TABLE_PATTERNS.iter().any(|re| re.is_match(text)) {
        return ChunkType::Table;
    }
    let trimmed = text.trim();
    if trimmed.split_whitespace().count() <= 10 && TRAILING_DIGITS.is_match(trimmed) {
        return ChunkType::Caption;
    }
    ChunkType::Text
}

pub fn split_paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

pub struct Chunker {
    config: ChunkingConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Chunker {
    pub fn new(config: ChunkingConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { config, tokenizer }
    }

    pub fn from_config(config: ChunkingConfig) -> Result<Self> {
        let tokenizer = BpeTokenizer::new(config.tokenizer)?;
        Ok(Self::new(config, Arc::new(tokenizer)))
    }

    pub fn chunk_pages(&self, doc_id: &str, pages: &[ParsedPage]) -> (Vec<Chunk>, ChunkStats) {
        let mut chunks = Vec::new();
        let mut next_index: HashMap<u32, usize> = HashMap::new();
        for page in pages {
            let pieces = self.pack_page(&page.text);
            let index = next_index.entry(page.page_number).or_insert(0);
            for piece in pieces {
                let chunk_type = match piece.kind {
                    ChunkType::Table => ChunkType::Table,
                    _ => match classify_paragraph(&piece.text) {
                        ChunkType::Caption => ChunkType::Caption,
                        _ => ChunkType::Text,
                    },
                };
                chunks.push(Chunk {
                    id: chunk_id(doc_id, page.page_number, *index),
                    doc_id: doc_id.to_string(),
                    page_start: page.page_number,
                    page_end: page.page_number,
                    section: None,
                    chunk_type,
                    text: piece.text,
                    overlap_len: piece.overlap_len,
                });
                *index += 1;
            }
        }
        let stats = self.stats(&chunks);
        debug!(doc_id, chunks = stats.chunks, "chunked pages");
        (chunks, stats)
    }

    fn pack_page(&self, text: &str) -> Vec<Piece> {
        let target = self.config.target_tokens.max(1);
        let mut out = Vec::new();
        let mut open = OpenChunk::default();
        for paragraph in split_paragraphs(text) {
            if classify_paragraph(paragraph) == ChunkType::Table {
                open.flush_into(&mut out);
                out.push(Piece {
                    text: paragraph.to_string(),
                    kind: ChunkType::Table,
                    overlap_len: 0,
                });
                continue;
            }
            for sentence in split_sentences(paragraph) {
                let sentence_tokens = self.tokenizer.count_tokens(sentence);
                if !open.sentences.is_empty() && open.tokens + sentence_tokens > target {
                    let last = open.sentences.last().map(|s| s.to_string());
                    open.flush_into(&mut out);
                    if let Some(last) = last {
                        let last_tokens = self.tokenizer.count_tokens(&last);
                        if self.config.overlap_tokens > 0 && last_tokens <= self.config.overlap_tokens
                        {
                            open.seed(last, last_tokens);
                        }
                    }
                }
                open.push(sentence, sentence_tokens);
            }
        }
        open.flush_into(&mut out);
        out
    }

    fn stats(&self, chunks: &[Chunk]) -> ChunkStats {
        let mut type_breakdown = BTreeMap::new();
        let mut token_total = 0usize;
        for chunk in chunks {
            *type_breakdown.entry(chunk.chunk_type).or_insert(0) += 1;
            token_total += self.tokenizer.count_tokens(&chunk.text);
        }
        let avg_chunk_tokens = if chunks.is_empty() {
            0.0
        } else {
            token_total as f32 / chunks.len() as f32
        };
        ChunkStats {
            chunks: chunks.len(),
            type_breakdown,
            avg_chunk_tokens,
        }
    }
}

/// Deterministic id: `doc_id:page:sequence`.
pub fn chunk_id(doc_id: &str, page: u32, index: usize) -> String {
    format!("{doc_id}:{page}:{index}")
}

struct Piece {
    text: String,
    kind: ChunkType,
    overlap_len: usize,
}

#[derive(Default)]
struct OpenChunk {
    sentences: Vec<String>,
    tokens: usize,
    seeded: bool,
}

impl OpenChunk {
    fn seed(&mut self, sentence: String, tokens: usize) {
        self.sentences.push(sentence);
        self.tokens = tokens;
        self.seeded = true;
    }

    fn push(&mut self, sentence: &str, tokens: usize) {
        self.sentences.push(sentence.to_string());
        self.tokens += tokens;
    }

    fn owned(&self) -> usize {
        self.sentences.len() - usize::from(self.seeded)
    }

    /// Emits the open chunk unless it holds nothing but a carried-over sentence.
    fn flush_into(&mut self, out: &mut Vec<Piece>) {
        if self.owned() > 0 {
            let overlap_len = if self.seeded {
                self.sentences[0].len()
            } else {
                0
            };
            out.push(Piece {
                text: self.sentences.join(" "),
                kind: ChunkType::Text,
                overlap_len,
            });
        }
        *self = OpenChunk::default();
    }
}
