mod client;
mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docchat_core::completion::CompletionConfig;
use docchat_core::embeddings::{
    HuggingFaceConfig, HuggingFaceEmbedder, OpenAiEmbedder, OpenAiEmbeddingConfig,
};
use docchat_core::{
    CharacterNgramEmbedder, ChatRequest, ChunkingConfig, CompletionStreamer, DiskBlobStore,
    DocumentLibrary, DocumentTextExtractor, EmbeddingBackend, EmbeddingProvider, IngestionPipeline,
    MemoryDocumentRepository, MemoryVectorStore, OpenAiCompatibleClient, QdrantStore,
    RetrievalOptions, RetrievalOrchestrator, RetryPolicy, RetryingEmbedder, DEFAULT_CHUNK_SIZE,
    DEFAULT_COLLECTION,
};
use server::{
    AppState, Library, SharedBlobs, SharedCompletion, SharedDocuments, SharedEmbedder, SharedIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docchat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector index backend
    #[arg(long, value_enum, env = "VECTOR_STORE", default_value = "qdrant")]
    vector_store: VectorStoreKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY")]
    qdrant_api_key: Option<String>,

    /// Collection holding document chunks
    #[arg(long, env = "QDRANT_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Embedding backend
    #[arg(long, value_enum, env = "EMBEDDING_PROVIDER", default_value = "openai")]
    embedding_provider: EmbeddingKind,

    /// Completion backend
    #[arg(long, value_enum, env = "COMPLETION_PROVIDER", default_value = "openai")]
    completion_provider: CompletionKind,

    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[arg(long, env = "CHAT_MODEL")]
    chat_model: Option<String>,

    #[arg(long, env = "HUGGINGFACE_API_KEY")]
    huggingface_api_key: Option<String>,

    /// HuggingFace inference endpoint used for chat completions
    #[arg(long, env = "HUGGINGFACE_INFERENCE_ENDPOINT")]
    huggingface_endpoint: Option<String>,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Chunks retrieved per question
    #[arg(long, default_value_t = 10)]
    top_k: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:4000")]
        bind: String,
        /// Directory for uploaded files.
        #[arg(long, env = "UPLOAD_DIR", default_value = "./uploads")]
        upload_dir: PathBuf,
        /// Base URL used in links to uploaded files.
        #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:4000")]
        public_url: String,
    },
    /// Ingest every supported file under a directory into one folder.
    Ingest {
        #[arg(long)]
        folder: PathBuf,
        #[arg(long, env = "UPLOAD_DIR", default_value = "./uploads")]
        upload_dir: PathBuf,
    },
    /// Ask a running server a question and print the streamed answer.
    Ask {
        #[arg(long, default_value = "http://localhost:4000")]
        server: String,
        #[arg(long)]
        question: String,
        /// Chat with one document.
        #[arg(long)]
        pdf_id: Option<String>,
        /// Restrict retrieval to one folder.
        #[arg(long)]
        folder_id: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VectorStoreKind {
    Qdrant,
    Memory,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbeddingKind {
    Openai,
    Huggingface,
    Local,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionKind {
    Openai,
    Huggingface,
}

impl Cli {
    fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            top_k: self.top_k,
            collection: self.collection.clone(),
        }
    }

    fn embedder(&self) -> anyhow::Result<SharedEmbedder> {
        let backend = match self.embedding_provider {
            EmbeddingKind::Openai => {
                let key = self.openai_api_key.clone().context(
                    "--openai-api-key (or OPENAI_API_KEY) is required for openai embeddings",
                )?;
                let mut config = OpenAiEmbeddingConfig::new(key);
                if let Some(base_url) = &self.openai_base_url {
                    config.base_url = base_url.clone();
                }
                if let Some(model) = &self.embedding_model {
                    config.model = model.clone();
                }
                EmbeddingBackend::OpenAi(OpenAiEmbedder::new(config))
            }
            EmbeddingKind::Huggingface => {
                let key = self.huggingface_api_key.clone().context(
                    "--huggingface-api-key (or HUGGINGFACE_API_KEY) is required for huggingface embeddings",
                )?;
                let mut config = HuggingFaceConfig::new(key);
                if let Some(model) = &self.embedding_model {
                    config.model = model.clone();
                }
                EmbeddingBackend::HuggingFace(HuggingFaceEmbedder::new(config))
            }
            EmbeddingKind::Local => EmbeddingBackend::Local(CharacterNgramEmbedder::default()),
        };

        Ok(Arc::new(RetryingEmbedder::new(backend, RetryPolicy::default())))
    }

    fn completion(&self) -> anyhow::Result<SharedCompletion> {
        let mut config = match self.completion_provider {
            CompletionKind::Openai => {
                let key = self.openai_api_key.clone().context(
                    "--openai-api-key (or OPENAI_API_KEY) is required for openai completions",
                )?;
                let mut config = CompletionConfig::openai(key);
                if let Some(base_url) = &self.openai_base_url {
                    config.base_url = base_url.clone();
                }
                config
            }
            CompletionKind::Huggingface => {
                let endpoint = self.huggingface_endpoint.clone().context(
                    "--huggingface-endpoint (or HUGGINGFACE_INFERENCE_ENDPOINT) is required for huggingface completions",
                )?;
                let key = self.huggingface_api_key.clone().unwrap_or_default();
                CompletionConfig::huggingface(key, endpoint)
            }
        };
        if let Some(model) = &self.chat_model {
            config.model = model.clone();
        }

        Ok(Arc::new(OpenAiCompatibleClient::new(config)))
    }

    fn index(&self) -> anyhow::Result<SharedIndex> {
        let index: SharedIndex = match self.vector_store {
            VectorStoreKind::Qdrant => Arc::new(
                QdrantStore::new(&self.qdrant_url, self.qdrant_api_key.clone())
                    .with_context(|| format!("invalid qdrant url {}", self.qdrant_url))?,
            ),
            VectorStoreKind::Memory => Arc::new(MemoryVectorStore::new()),
        };
        Ok(index)
    }

    async fn library(
        &self,
        embedder: SharedEmbedder,
        index: SharedIndex,
        documents: SharedDocuments,
        upload_dir: &Path,
        public_url: &str,
    ) -> anyhow::Result<Library> {
        let chunking = ChunkingConfig {
            max_chars: self.chunk_size,
        };
        chunking.validate()?;

        let pipeline = IngestionPipeline::new(embedder, index, chunking, self.collection.clone());
        pipeline
            .prepare()
            .await
            .with_context(|| format!("could not prepare collection {}", self.collection))?;

        let blobs: SharedBlobs = Arc::new(DiskBlobStore::new(upload_dir));
        Ok(DocumentLibrary::new(
            pipeline,
            documents,
            blobs,
            Arc::new(DocumentTextExtractor),
            public_url,
        ))
    }
}

async fn warm_up(embedder: &SharedEmbedder) {
    match embedder.warm_up().await {
        Ok(()) => info!(model = embedder.model_name(), "embedding model warmed up"),
        Err(error) => warn!(model = embedder.model_name(), %error, "embedding warm-up failed"),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docchat boot"
    );

    match &cli.command {
        Command::Serve {
            bind,
            upload_dir,
            public_url,
        } => {
            tokio::fs::create_dir_all(upload_dir)
                .await
                .with_context(|| format!("could not create {}", upload_dir.display()))?;

            let embedder = cli.embedder()?;
            let index = cli.index()?;
            let completion = cli.completion()?;
            let documents: SharedDocuments = Arc::new(MemoryDocumentRepository::new());
            warm_up(&embedder).await;

            let library = cli
                .library(
                    Arc::clone(&embedder),
                    Arc::clone(&index),
                    Arc::clone(&documents),
                    upload_dir,
                    public_url,
                )
                .await?;
            let orchestrator =
                RetrievalOrchestrator::new(embedder, index, documents, cli.retrieval_options());
            let streamer = CompletionStreamer::new(completion);

            let app = server::router(AppState::new(library, orchestrator, streamer), upload_dir);
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("could not bind {bind}"))?;
            info!(address = %bind, collection = %cli.collection, "listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Ingest { folder, upload_dir } => {
            if matches!(cli.vector_store, VectorStoreKind::Memory) {
                warn!("the memory vector store is discarded when this command exits");
            }

            let embedder = cli.embedder()?;
            warm_up(&embedder).await;
            let documents: SharedDocuments = Arc::new(MemoryDocumentRepository::new());
            let library = cli
                .library(embedder, cli.index()?, documents, upload_dir, "")
                .await?;

            let report = library.ingest_directory(folder).await?;
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            for document in &report.ingested {
                println!("{}  {}", document.id, document.file_name);
            }
            println!(
                "{} documents ingested into folder {} ({}), {} skipped",
                report.ingested.len(),
                report.folder.name,
                report.folder.id,
                report.skipped.len()
            );
        }
        Command::Ask {
            server,
            question,
            pdf_id,
            folder_id,
        } => {
            let request = ChatRequest {
                question: question.clone(),
                pdf_id: pdf_id.clone(),
                folder_id: folder_id.clone(),
            };
            let mut stdout = std::io::stdout();
            client::ask(server, &request, &mut stdout).await?;
        }
    }

    Ok(())
}
