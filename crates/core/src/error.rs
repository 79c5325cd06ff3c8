use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is rate limiting requests")]
    RateLimited,

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("embedding retries exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected embedding response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),

    #[error("collection {0} does not exist")]
    MissingCollection(String),

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("invalid folder name: {0:?}")]
    InvalidFolderName(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("text extraction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("question could not be embedded: {0}")]
    RetrievalFailed(#[source] EmbeddingError),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("question is empty")]
    EmptyQuestion,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion provider is rate limiting requests")]
    RateLimited,

    #[error("completion provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed completion chunk: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("event frame is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("event payload is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("stream ended inside an unterminated frame")]
    TruncatedFrame,
}

/// Why a streamed answer stopped before its `end` event.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("client disconnected after {} streamed characters", .partial.len())]
    Disconnected { partial: String },

    #[error("completion failed mid-stream: {source}")]
    Provider {
        #[source]
        source: CompletionError,
        partial: String,
    },
}

impl StreamError {
    pub fn partial_reply(&self) -> &str {
        match self {
            Self::Disconnected { partial } | Self::Provider { partial, .. } => partial,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
