use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    /// Storage key relative to the blob store root.
    pub file_path: String,
    pub content: String,
    pub uploaded_at: DateTime<Utc>,
    pub folder: Option<Folder>,
    pub owner_id: Option<String>,
}

impl Document {
    pub fn folder_id(&self) -> Option<&str> {
        self.folder.as_ref().map(|folder| folder.id.as_str())
    }

    pub fn as_source(&self) -> SourceDocument {
        SourceDocument {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            file_path: self.file_path.clone(),
        }
    }
}

/// A document reference announced to the client before the answer streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Equality match on one payload field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadFilter {
    pub key: String,
    pub value: String,
}

impl PayloadFilter {
    pub const DOCUMENT_ID: &'static str = "documentId";
    pub const FOLDER_ID: &'static str = "folderId";

    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            key: Self::DOCUMENT_ID.to_string(),
            value: document_id.into(),
        }
    }

    pub fn folder(folder_id: impl Into<String>) -> Self {
        Self {
            key: Self::FOLDER_ID.to_string(),
            value: folder_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

/// Message sequence owned by a single chat request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role,
            content: content.into(),
        });
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.push(Role::System, content);
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.push(Role::User, content);
        self
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub pdf_id: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl ChatRequest {
    /// `pdfId` wins over `folderId`; neither means the whole library.
    pub fn mode(&self) -> RetrievalMode {
        match (&self.pdf_id, &self.folder_id) {
            (Some(pdf_id), _) => RetrievalMode::SingleDocument(pdf_id.clone()),
            (None, Some(folder_id)) => RetrievalMode::Folder(folder_id.clone()),
            (None, None) => RetrievalMode::Library,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RetrievalMode {
    SingleDocument(String),
    Library,
    Folder(String),
}

impl RetrievalMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleDocument(_) => "document",
            Self::Library => "library",
            Self::Folder(_) => "folder",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub collection: String,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

pub const DEFAULT_COLLECTION: &str = "pdf_collection";
