use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural record reported by a parser (heading, line box, image, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Block {
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bbox: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedPage {
    #[serde(alias = "page")]
    pub page_number: u32,
    pub text: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub lang: Option<String>,
}

impl ParsedPage {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            blocks: Vec::new(),
            lang: None,
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ParseMeta {
    pub total_pages: u32,
    pub source_format: String,
    #[serde(default)]
    pub extra: Value,
}
