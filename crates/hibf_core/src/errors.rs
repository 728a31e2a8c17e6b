use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HibfError {
    /// Invalid, missing or contradictory parameters. Raised before any work starts.
    #[error("configuration: {0}")]
    Config(String),

    /// An output location could not be created or opened.
    #[error("resource {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Layout and key data disagree on the set of user bins.
    #[error("consistency: {0}")]
    Consistency(String),

    #[error("numeric: {0}")]
    Numeric(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persist: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Bad magic or version")]
    BadHeader,

    #[error("Corrupt archive")]
    Corrupt,
}

impl HibfError {
    pub(crate) fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HibfError::Resource { path: path.into(), source }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        HibfError::Parse { line, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, HibfError>;
