use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("parsing failed for {path:?}: {message}")]
    Parsing { path: PathBuf, message: String },
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
    #[error("{service} unavailable after {attempts} attempts: {message}")]
    TransientService {
        service: &'static str,
        attempts: usize,
        message: String,
    },
    #[error("{service} rejected request (status {status}): {message}")]
    ClientService {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("other: {0}")]
    Other(String),
}

impl RagError {
    pub fn parsing(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parsing {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::TransientService { .. })
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

impl From<anyhow::Error> for RagError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<toml::de::Error> for RagError {
    fn from(value: toml::de::Error) -> Self {
        Self::Config(value.to_string())
    }
}
