use std::fs;
use std::path::Path;

use html2text::from_read;
use pulldown_cmark::{html, Parser as MarkdownParser};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{RagError, Result};
use crate::page::{ParseMeta, ParsedPage};
use crate::traits::Parser;

/// Reads text-bearing files into pages. Plain text uses form feeds as page
/// breaks; JSON input is either a page list or `{"pages": [...]}`.
#[derive(Debug, Clone, Default)]
pub struct FileParser;

impl FileParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for FileParser {
    fn parse(&self, path: &Path) -> Result<(Vec<ParsedPage>, ParseMeta)> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_lowercase());
        let (pages, format) = match ext.as_deref() {
            Some("txt") | Some("text") | None => (text_to_pages(&read_text_lossy(path)?), "text"),
            Some("md") | Some("markdown") => (
                text_to_pages(&markdown_to_text(&read_text_lossy(path)?)),
                "markdown",
            ),
            Some("html") | Some("htm") => (
                text_to_pages(&html_to_plaintext(&read_text_lossy(path)?)),
                "html",
            ),
            Some("json") => (json_to_pages(path, &read_text_lossy(path)?)?, "json"),
            Some("pdf") => (pdf_to_pages(path)?, "pdf"),
            _ => return Err(RagError::UnsupportedInput(path.to_path_buf())),
        };
        if !pages.iter().any(ParsedPage::has_text) {
            return Err(RagError::parsing(path, "no extractable text"));
        }
        debug!(path = %path.display(), pages = pages.len(), format, "parsed document");
        let meta = ParseMeta {
            total_pages: pages.len() as u32,
            source_format: format.to_string(),
            extra: json!({ "source": path.display().to_string() }),
        };
        Ok((pages, meta))
    }
}

pub fn text_to_pages(text: &str) -> Vec<ParsedPage> {
    text.split('\u{c}')
        .enumerate()
        .map(|(idx, page)| ParsedPage::new(idx as u32 + 1, page))
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PagesFile {
    Wrapped { pages: Vec<ParsedPage> },
    Bare(Vec<ParsedPage>),
}

fn json_to_pages(path: &Path, raw: &str) -> Result<Vec<ParsedPage>> {
    let parsed: PagesFile = serde_json::from_str(raw)
        .map_err(|e| RagError::parsing(path, format!("invalid pages json: {e}")))?;
    Ok(match parsed {
        PagesFile::Wrapped { pages } | PagesFile::Bare(pages) => pages,
    })
}

#[cfg(feature = "pdf")]
fn pdf_to_pages(path: &Path) -> Result<Vec<ParsedPage>> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|e| RagError::parsing(path, format!("pdf extract failed: {e}")))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(idx, text)| ParsedPage::new(idx as u32 + 1, text))
        .collect())
}

#[cfg(not(feature = "pdf"))]
fn pdf_to_pages(path: &Path) -> Result<Vec<ParsedPage>> {
    Err(RagError::UnsupportedInput(path.to_path_buf()))
}

fn markdown_to_text(md: &str) -> String {
    let mut html_buf = String::new();
    html::push_html(&mut html_buf, MarkdownParser::new(md));
    html_to_plaintext(&html_buf)
}

fn html_to_plaintext(html_src: &str) -> String {
    from_read(html_src.as_bytes(), 80)
}

fn read_text_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}
