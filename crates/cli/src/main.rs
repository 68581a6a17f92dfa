use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use citerag_core::{
    BpeTokenizer, Chunker, FileParser, Generator, Parser as _, PipelineConfig, VectorStore,
};
use citerag_index::JsonlWriter;
use citerag_rag::{
    namespace_for, AnswerPipeline, AnswerRequest, DocumentStatus, EmbeddingClient, IngestJob,
    LlmClient, LlmReranker, RagStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (formats: ",
    env!("CITERAG_FORMATS"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "citerag", version = VERSION, long_version = VERSION_LONG, about = "Cited answers over ingested documents")]
struct Cli {
    /// TOML configuration; `citerag.toml` in the working directory is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "rag.sqlite")]
    db: PathBuf,
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and chunk a document, writing chunks as JSON lines.
    Chunk {
        input: PathBuf,
        #[arg(long = "doc-id")]
        doc_id: Option<String>,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Parse, chunk, embed and index a document.
    Ingest {
        input: PathBuf,
        #[arg(long = "doc-id")]
        doc_id: Option<String>,
        /// Directory for page and chunk dumps.
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    Ask {
        doc_id: String,
        question: String,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        #[arg(long, action = ArgAction::SetTrue)]
        quote: bool,
    },
    Status {
        doc_id: String,
    },
    /// List documents, most recently updated first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only documents in this state (queued, processing, ready, failed).
        #[arg(long)]
        status: Option<String>,
    },
    /// Remove a document's indexed chunks and its status record.
    Delete {
        doc_id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = PipelineConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Chunk { input, doc_id, out } => {
            let doc_id = doc_id.unwrap_or_else(|| doc_id_from_path(&input));
            let (pages, _meta) = FileParser::new()
                .parse(&input)
                .with_context(|| format!("failed to parse {}", input.display()))?;
            let chunker = Chunker::from_config(config.chunking)?;
            let (chunks, stats) = chunker.chunk_pages(&doc_id, &pages);
            let sink: Box<dyn Write> = match &out {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(io::stdout().lock())),
            };
            let mut writer = JsonlWriter::new(sink);
            writer.write_all(&chunks)?;
            writer.into_inner()?;
            eprintln!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Ingest {
            input,
            doc_id,
            artifacts,
        } => {
            let doc_id = doc_id.unwrap_or_else(|| doc_id_from_path(&input));
            let store = Arc::new(open_store(&cli.db)?);
            store.set_status(&doc_id, &DocumentStatus::Queued)?;
            let embedder = EmbeddingClient::from_config(&config.embedding, config.retry)?;
            let mut job = IngestJob::new(
                Arc::new(FileParser::new()),
                Chunker::from_config(config.chunking)?,
                Arc::new(embedder),
                store.clone(),
                store.clone(),
            );
            if let Some(dir) = artifacts {
                job = job.with_artifacts(dir);
            }
            let report = job.run(&doc_id, &input);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_ready() {
                bail!("ingestion of {doc_id} failed");
            }
        }
        Commands::Ask {
            doc_id,
            question,
            top_k,
            quote,
        } => {
            let store = Arc::new(open_store(&cli.db)?);
            let generator: Arc<dyn Generator> =
                Arc::new(LlmClient::from_config(&config.llm, config.retry)?);
            let embedder = EmbeddingClient::from_config(&config.embedding, config.retry)?;
            let tokenizer = BpeTokenizer::new(config.chunking.tokenizer)?;
            let rerank = config.rerank.enabled;
            let mut pipeline = AnswerPipeline::new(
                config,
                Arc::new(embedder),
                store,
                generator.clone(),
                Arc::new(tokenizer),
            );
            if rerank {
                pipeline = pipeline.with_reranker(Arc::new(LlmReranker::new(generator)));
            }
            let request = AnswerRequest {
                question,
                doc_id,
                top_k,
                quote_mode: quote,
            };
            let outcome = pipeline.answer(&request)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Status { doc_id } => {
            let store = open_store(&cli.db)?;
            let record = store
                .status(&doc_id)?
                .ok_or_else(|| anyhow!("unknown document {doc_id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::List { limit, status } => {
            let store = open_store(&cli.db)?;
            let records = store.list_documents(limit, status.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Delete { doc_id } => {
            let store = open_store(&cli.db)?;
            let namespace = namespace_for(&doc_id);
            let removed = store.count_points(&namespace)?;
            store.delete_namespace(&namespace)?;
            let had_status = store.delete_document(&doc_id)?;
            if removed == 0 && !had_status {
                bail!("unknown document {doc_id}");
            }
            info!(doc_id = %doc_id, removed, "deleted document");
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "docId": doc_id,
                    "namespace": namespace,
                    "removed": removed,
                }))?
            );
        }
    }
    Ok(())
}

fn open_store(path: &Path) -> Result<RagStore> {
    RagStore::open(path).with_context(|| format!("failed to open store {}", path.display()))
}

fn doc_id_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
        .unwrap_or_else(|| "document".to_string())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_defaults_to_file_stem() {
        assert_eq!(doc_id_from_path(Path::new("/tmp/report-2024.pdf")), "report-2024");
        assert_eq!(doc_id_from_path(Path::new("/")), "document");
    }

    #[test]
    fn ask_arguments_parse() {
        let cli = Cli::try_parse_from([
            "citerag", "--db", "x.sqlite", "ask", "doc-1", "what?", "--top-k", "4", "--quote",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                doc_id,
                top_k,
                quote,
                ..
            } => {
                assert_eq!(doc_id, "doc-1");
                assert_eq!(top_k, Some(4));
                assert!(quote);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.db, PathBuf::from("x.sqlite"));
    }

    #[test]
    fn list_arguments_parse() {
        let cli = Cli::try_parse_from(["citerag", "list", "--status", "ready"]).unwrap();
        match cli.command {
            Commands::List { limit, status } => {
                assert_eq!(limit, 20);
                assert_eq!(status.as_deref(), Some("ready"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
