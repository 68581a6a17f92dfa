use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::error::{RagError, Result};

/// Anything that can measure the token cost of a piece of text.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    Cl100k,
    O200k,
    Gpt2,
}

impl TokenizerKind {
    pub fn build(&self) -> Result<CoreBPE> {
        let built = match self {
            TokenizerKind::Cl100k => tiktoken_rs::cl100k_base(),
            TokenizerKind::O200k => tiktoken_rs::o200k_base(),
            TokenizerKind::Gpt2 => tiktoken_rs::p50k_base(),
        };
        built.map_err(|e| RagError::Tokenizer(e.to_string()))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "cl100k" | "cl100k_base" => Some(TokenizerKind::Cl100k),
            "o200k" | "o200k_base" => Some(TokenizerKind::O200k),
            "gpt2" | "p50k" | "p50k_base" => Some(TokenizerKind::Gpt2),
            _ => None,
        }
    }
}

/// BPE token counter shared by the chunker and the context builder.
#[derive(Clone)]
pub struct BpeTokenizer {
    kind: TokenizerKind,
    bpe: Arc<CoreBPE>,
}

impl BpeTokenizer {
    pub fn new(kind: TokenizerKind) -> Result<Self> {
        Ok(Self {
            kind,
            bpe: Arc::new(kind.build()?),
        })
    }
}

impl Tokenizer for BpeTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for BpeTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenizer").field("kind", &self.kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_count_tokens() {
        let words = |text: &str| text.split_whitespace().count();
        assert_eq!(words.count_tokens("one two three"), 3);
    }

    #[test]
    fn cl100k_counts_nonzero_for_text() {
        let tokenizer = BpeTokenizer::new(TokenizerKind::Cl100k).unwrap();
        assert!(tokenizer.count_tokens("Hello world.") > 0);
        assert_eq!(tokenizer.count_tokens(""), 0);
    }

    #[test]
    fn tokenizer_names_parse() {
        assert_eq!(TokenizerKind::from_name("CL100K"), Some(TokenizerKind::Cl100k));
        assert_eq!(TokenizerKind::from_name("o200k_base"), Some(TokenizerKind::O200k));
        assert_eq!(TokenizerKind::from_name("bert"), None);
    }
}
