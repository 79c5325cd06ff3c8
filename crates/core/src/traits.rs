use crate::error::{CompletionError, IndexError, StorageError};
use crate::models::{ConversationMessage, Document, Folder, IndexPoint, PayloadFilter, ScoredPoint};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the collection with cosine distance unless it already exists.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError>;

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError>;

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<(), IndexError>;

    /// Nearest points by descending score, ties ordered by point id.
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    async fn delete_points(
        &self,
        collection: &str,
        filter: &PayloadFilter,
    ) -> Result<(), IndexError>;
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Arc<T> {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        (**self).ensure_collection(name, dimension).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        (**self).delete_collection(name).await
    }

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<(), IndexError> {
        (**self).upsert(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        (**self).search(collection, query_vector, limit, filter).await
    }

    async fn delete_points(
        &self,
        collection: &str,
        filter: &PayloadFilter,
    ) -> Result<(), IndexError> {
        (**self).delete_points(collection, filter).await
    }
}

/// Incremental text fragments of one completion, in arrival order.
pub type CompletionStream = BoxStream<'static, Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Opens a streaming completion. Dropping the returned stream releases
    /// the underlying connection.
    async fn stream_completion(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<CompletionStream, CompletionError>;
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn stream_completion(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<CompletionStream, CompletionError> {
        (**self).stream_completion(messages).await
    }
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn save(&self, document: Document) -> Result<Document, StorageError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, StorageError>;

    async fn get_all(&self) -> Result<Vec<Document>, StorageError>;

    async fn delete(&self, id: &str) -> Result<Option<Document>, StorageError>;

    async fn get_or_create_folder(&self, name: &str) -> Result<Folder, StorageError>;

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>, StorageError>;

    async fn list_folders(&self) -> Result<Vec<Folder>, StorageError>;
}

#[async_trait]
impl<T: DocumentRepository + ?Sized> DocumentRepository for Arc<T> {
    async fn save(&self, document: Document) -> Result<Document, StorageError> {
        (**self).save(document).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, StorageError> {
        (**self).get_by_id(id).await
    }

    async fn get_all(&self) -> Result<Vec<Document>, StorageError> {
        (**self).get_all().await
    }

    async fn delete(&self, id: &str) -> Result<Option<Document>, StorageError> {
        (**self).delete(id).await
    }

    async fn get_or_create_folder(&self, name: &str) -> Result<Folder, StorageError> {
        (**self).get_or_create_folder(name).await
    }

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>, StorageError> {
        (**self).get_folder(id).await
    }

    async fn list_folders(&self) -> Result<Vec<Folder>, StorageError> {
        (**self).list_folders().await
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).save(path, bytes).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        (**self).delete(path).await
    }
}
