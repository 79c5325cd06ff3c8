use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use docchat_core::{
    encode_event, BlobStore, ChatRequest, CompletionProvider, CompletionStreamer, DocumentLibrary,
    DocumentRepository, EmbeddingProvider, ExtractError, Folder, FolderSelector, IngestError,
    RetrievalError, RetrievalOrchestrator, StorageError, StreamError, StreamEvent, UploadedDocument,
    UploadedFile, VectorIndex,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub type SharedEmbedder = Arc<dyn EmbeddingProvider>;
pub type SharedIndex = Arc<dyn VectorIndex>;
pub type SharedDocuments = Arc<dyn DocumentRepository>;
pub type SharedBlobs = Arc<dyn BlobStore>;
pub type SharedCompletion = Arc<dyn CompletionProvider>;

pub type Library = DocumentLibrary<SharedEmbedder, SharedIndex, SharedDocuments, SharedBlobs>;
pub type Orchestrator = RetrievalOrchestrator<SharedEmbedder, SharedIndex, SharedDocuments>;
pub type Streamer = CompletionStreamer<SharedCompletion>;

const EVENT_BUFFER: usize = 32;
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    library: Arc<Library>,
    orchestrator: Arc<Orchestrator>,
    streamer: Arc<Streamer>,
}

impl AppState {
    pub fn new(library: Library, orchestrator: Orchestrator, streamer: Streamer) -> Self {
        Self {
            library: Arc::new(library),
            orchestrator: Arc::new(orchestrator),
            streamer: Arc::new(streamer),
        }
    }
}

pub fn router(state: AppState, upload_dir: &FsPath) -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/pdf", get(list_documents))
        .route("/pdf/upload", post(upload))
        .route("/pdf/folders", get(list_folders))
        .route("/pdf/create-folder", post(create_folder))
        .route("/pdf/chat", post(chat))
        .route("/pdf/library-chat", post(library_chat))
        .route("/pdf/{id}", delete(delete_document))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON error body `{ "error": message }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        } else {
            debug!(status = %self.status, message = %self.message, "request rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn storage_status(error: &StorageError) -> StatusCode {
    match error {
        StorageError::InvalidFolderName(_) | StorageError::InvalidPath(_) => {
            StatusCode::BAD_REQUEST
        }
        StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        let status = match &error {
            IngestError::Extraction(ExtractError::UnsupportedFormat(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            IngestError::Extraction(ExtractError::CorruptFile(_))
            | IngestError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            IngestError::DocumentNotFound(_) | IngestError::FolderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            IngestError::Embedding(_) | IngestError::Index(_) => StatusCode::BAD_GATEWAY,
            IngestError::Storage(storage) => storage_status(storage),
            IngestError::Io(_) | IngestError::InvalidChunkConfig(_) | IngestError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, error.to_string())
    }
}

impl From<RetrievalError> for ApiError {
    fn from(error: RetrievalError) -> Self {
        let status = match &error {
            RetrievalError::EmptyQuestion => StatusCode::BAD_REQUEST,
            RetrievalError::DocumentNotFound(_) | RetrievalError::FolderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            RetrievalError::RetrievalFailed(_) | RetrievalError::Index(_) => {
                StatusCode::BAD_GATEWAY
            }
            RetrievalError::Storage(storage) => storage_status(storage),
        };
        Self::new(status, error.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        Self::new(storage_status(&error), error.to_string())
    }
}

async fn hello() -> &'static str {
    "Hello World!"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSummary {
    id: String,
    file_name: String,
    file_size: u64,
    mime_type: String,
    url: String,
    uploaded_at: DateTime<Utc>,
    folder: Option<Folder>,
}

#[tracing::instrument(skip_all)]
async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let documents = state.library.documents().get_all().await?;
    let summaries = documents
        .into_iter()
        .map(|document| DocumentSummary {
            url: state.library.content_url(&document.file_path),
            id: document.id,
            file_name: document.file_name,
            file_size: document.file_size,
            mime_type: document.mime_type,
            uploaded_at: document.uploaded_at,
            folder: document.folder,
        })
        .collect();
    Ok(Json(summaries))
}

#[tracing::instrument(skip_all)]
async fn list_folders(State(state): State<AppState>) -> Result<Json<Vec<Folder>>, ApiError> {
    Ok(Json(state.library.documents().list_folders().await?))
}

#[derive(Debug, Deserialize)]
struct CreateFolder {
    name: String,
}

#[tracing::instrument(skip_all, fields(name = %request.name))]
async fn create_folder(
    State(state): State<AppState>,
    Json(request): Json<CreateFolder>,
) -> Result<Json<Folder>, ApiError> {
    let folder = state.library.documents().get_or_create_folder(&request.name).await?;
    info!(folder_id = %folder.id, "folder ready");
    Ok(Json(folder))
}

#[tracing::instrument(skip_all)]
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<UploadedDocument>>), ApiError> {
    let mut files = Vec::new();
    let mut folder_id = None;
    let mut folder_name = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::bad_request(error.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("file part has no filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|error| ApiError::bad_request(error.body_text()))?;
                files.push(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            Some("folderId") => folder_id = Some(field_text(field).await?),
            Some("folderName") => folder_name = Some(field_text(field).await?),
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    let folder = match (folder_id, folder_name) {
        (Some(id), _) if !id.trim().is_empty() => Some(FolderSelector::Id(id)),
        (_, Some(name)) if !name.trim().is_empty() => Some(FolderSelector::Name(name)),
        _ => None,
    };

    info!(files = files.len(), folder = ?folder, "upload received");
    let uploaded = state.library.upload(files, folder).await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|error| ApiError::bad_request(error.body_text()))
}

#[tracing::instrument(skip_all, fields(document_id = %id))]
async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.library.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryChatRequest {
    question: String,
    #[serde(default)]
    folder_id: Option<String>,
}

async fn library_chat(
    state: State<AppState>,
    Json(request): Json<LibraryChatRequest>,
) -> Result<Response, ApiError> {
    chat(
        state,
        Json(ChatRequest {
            question: request.question,
            pdf_id: None,
            folder_id: request.folder_id,
        }),
    )
    .await
}

/// Failures before the first event are plain HTTP errors; afterwards they
/// travel in-band as an `error` event.
#[tracing::instrument(skip_all, fields(mode = request.mode().label()))]
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let prepared = state.orchestrator.prepare(&request).await?;

    let (sink, receiver) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    let streamer = Arc::clone(&state.streamer);

    tokio::spawn(async move {
        let outcome = streamer
            .stream(prepared.conversation.messages(), &prepared.sources, &sink)
            .await;
        match outcome {
            Ok(reply) => debug!(reply_chars = reply.len(), "answer delivered"),
            Err(StreamError::Disconnected { partial }) => {
                info!(streamed_chars = partial.len(), "client went away mid-answer")
            }
            Err(error) => warn!(%error, "answer ended with a provider error"),
        }
    });

    let body = ReceiverStream::new(receiver).map(|event| encode_event(&event));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .map_err(|error| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))
}
