use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use citerag_core::{
    Chunk, ChunkPayload, Chunker, Embedder, ParsedPage, Parser, RagError, Result, VectorPoint,
    VectorStore,
};
use citerag_index::JsonlWriter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::pipeline::namespace_for;
use crate::store::{DocumentStatus, RagStore};

/// Where ingestion records document state transitions.
pub trait StatusSink: Send + Sync {
    fn record(&self, doc_id: &str, status: &DocumentStatus) -> Result<()>;
}

impl StatusSink for RagStore {
    fn record(&self, doc_id: &str, status: &DocumentStatus) -> Result<()> {
        self.set_status(doc_id, status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub namespace: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

impl IngestReport {
    pub fn is_ready(&self) -> bool {
        matches!(self.status, DocumentStatus::Ready { .. })
    }
}

/// Parses, chunks, embeds and indexes one document, replacing whatever the
/// namespace held before. Failures end up in the status sink as `failed`;
/// nothing already written is rolled back.
pub struct IngestJob {
    parser: Arc<dyn Parser>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    status: Arc<dyn StatusSink>,
    artifacts_dir: Option<PathBuf>,
}

impl IngestJob {
    pub fn new(
        parser: Arc<dyn Parser>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            parser,
            chunker,
            embedder,
            store,
            status,
            artifacts_dir: None,
        }
    }

    /// Also dump parsed pages and chunks as JSON lines under `dir`.
    pub fn with_artifacts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn run(&self, doc_id: &str, path: &Path) -> IngestReport {
        let namespace = namespace_for(doc_id);
        let status = match self.process(doc_id, path, &namespace) {
            Ok((pages, chunks)) => {
                info!(doc_id, pages, chunks, "document ready");
                DocumentStatus::Ready { pages, chunks }
            }
            Err(err) => {
                warn!(doc_id, error = %err, "ingestion failed");
                DocumentStatus::Failed {
                    error: err.to_string(),
                }
            }
        };
        if let Err(err) = self.status.record(doc_id, &status) {
            warn!(doc_id, error = %err, "could not record final document status");
        }
        IngestReport {
            doc_id: doc_id.to_string(),
            namespace,
            status,
        }
    }

    fn process(&self, doc_id: &str, path: &Path, namespace: &str) -> Result<(usize, usize)> {
        self.status.record(doc_id, &DocumentStatus::Processing)?;
        let (pages, meta) = self.parser.parse(path)?;
        let (chunks, stats) = self.chunker.chunk_pages(doc_id, &pages);
        debug!(
            doc_id,
            chunks = stats.chunks,
            avg_tokens = stats.avg_chunk_tokens,
            "chunked document"
        );
        if let Some(dir) = &self.artifacts_dir {
            write_artifacts(dir, doc_id, &pages, &chunks)?;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Other(format!(
                "embedded {} of {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.id.clone(),
                vector,
                payload: ChunkPayload::from(chunk),
            })
            .collect();
        // Chunks from an earlier run of the same document must not linger.
        self.store.delete_namespace(namespace)?;
        self.store.upsert(namespace, &points)?;
        Ok((meta.total_pages as usize, chunks.len()))
    }
}

fn write_artifacts(dir: &Path, doc_id: &str, pages: &[ParsedPage], chunks: &[Chunk]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut pages_out = JsonlWriter::new(BufWriter::new(File::create(
        dir.join(format!("{doc_id}.pages.jsonl")),
    )?));
    pages_out.write_all(pages)?;
    pages_out.into_inner()?;
    let mut chunks_out = JsonlWriter::new(BufWriter::new(File::create(
        dir.join(format!("{doc_id}.chunks.jsonl")),
    )?));
    chunks_out.write_all(chunks)?;
    chunks_out.into_inner()?;
    Ok(())
}
