pub mod assembler;
pub mod blob;
pub mod chunking;
pub mod completion;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod retry;
pub mod store;
pub mod stores;
pub mod streaming;
pub mod traits;
pub mod wire;

pub use assembler::{ChatTranscript, TokenAssembler};
pub use blob::DiskBlobStore;
pub use chunking::{chunk_text, point_id, ChunkingConfig, DEFAULT_CHUNK_SIZE};
pub use completion::{CompletionConfig, OpenAiCompatibleClient};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingBackend, EmbeddingProvider, RetryingEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    CompletionError, EmbeddingError, ExtractError, IndexError, IngestError, RetrievalError,
    StorageError, StreamError, WireError,
};
pub use extractor::{DocumentTextExtractor, TextExtractor};
pub use ingest::{
    discover_documents, DirectoryReport, DocumentLibrary, FolderSelector, IngestionPipeline,
    SkippedFile, UploadedDocument, UploadedFile,
};
pub use models::{
    ChatRequest, Chunk, ChunkPayload, Conversation, ConversationMessage, Document, Folder,
    IndexPoint, PayloadFilter, RetrievalMode, RetrievalOptions, Role, ScoredPoint, SourceDocument,
    DEFAULT_COLLECTION,
};
pub use orchestrator::{PreparedChat, RetrievalOrchestrator};
pub use repository::MemoryDocumentRepository;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use stores::{MemoryVectorStore, QdrantStore};
pub use streaming::{CompletionStreamer, EventSink};
pub use traits::{BlobStore, CompletionProvider, CompletionStream, DocumentRepository, VectorIndex};
pub use wire::{encode_event, EventDecoder, StreamEvent};
