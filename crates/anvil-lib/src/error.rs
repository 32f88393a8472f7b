use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or parsing catalog metadata.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("Unknown format version!")]
    UnknownFormatVersion,

    #[error("Failed to parse metadata: {0}")]
    Parse(String),

    #[error("Invalid JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Loading {0} failed")]
    LoadFailed(String),

    #[error(transparent)]
    Net(#[from] NetError),
}

impl MetaError {
    pub fn parse(msg: impl Into<String>) -> Self {
        MetaError::Parse(msg.into())
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        MetaError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Errors raised by the cached fetch layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("Response rejected by validator: {0}")]
    Validation(String),

    #[error("Unknown cache base '{0}'")]
    UnknownBase(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NetError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NetError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Terminal outcome of a task that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// User-requested stop. Not a failure.
    #[error("Task aborted")]
    Aborted,

    #[error("{0}")]
    Failed(String),

    #[error("One or more subtasks failed ({failed} of {total})")]
    SubTasksFailed { failed: usize, total: usize },
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        TaskError::Failed(format!("{:#}", e))
    }
}
