use crate::models::{Document, Folder};
use crate::traits::DocumentRepository;
use crate::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Records {
    documents: HashMap<String, Document>,
    folders: HashMap<String, Folder>,
}

/// Document and folder metadata held in process memory.
///
/// Folder names are unique; creating a folder that already exists returns
/// the existing one.
#[derive(Default)]
pub struct MemoryDocumentRepository {
    records: RwLock<Records>,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn save(&self, document: Document) -> Result<Document, StorageError> {
        self.records
            .write()
            .await
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, StorageError> {
        Ok(self.records.read().await.documents.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Document>, StorageError> {
        let mut documents: Vec<Document> =
            self.records.read().await.documents.values().cloned().collect();
        documents.sort_by(|left, right| {
            right
                .uploaded_at
                .cmp(&left.uploaded_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(documents)
    }

    async fn delete(&self, id: &str) -> Result<Option<Document>, StorageError> {
        Ok(self.records.write().await.documents.remove(id))
    }

    async fn get_or_create_folder(&self, name: &str) -> Result<Folder, StorageError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::InvalidFolderName(name.to_string()));
        }

        let mut records = self.records.write().await;
        if let Some(existing) = records.folders.values().find(|folder| folder.name == name) {
            return Ok(existing.clone());
        }

        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        records.folders.insert(folder.id.clone(), folder.clone());
        Ok(folder)
    }

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>, StorageError> {
        Ok(self.records.read().await.folders.get(id).cloned())
    }

    async fn list_folders(&self) -> Result<Vec<Folder>, StorageError> {
        let mut folders: Vec<Folder> =
            self.records.read().await.folders.values().cloned().collect();
        folders.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn document(id: &str, age_minutes: i64) -> Document {
        Document {
            id: id.to_string(),
            file_name: format!("{id}.pdf"),
            file_size: 3,
            mime_type: "application/pdf".to_string(),
            file_path: format!("{id}.pdf"),
            content: "abc".to_string(),
            uploaded_at: Utc::now() - Duration::minutes(age_minutes),
            folder: None,
            owner_id: None,
        }
    }

    #[tokio::test]
    async fn folders_are_created_once_per_name() {
        let repository = Arc::new(MemoryDocumentRepository::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repository = Arc::clone(&repository);
                tokio::spawn(async move { repository.get_or_create_folder("Manuals").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(repository.list_folders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_folder_name_is_rejected() {
        let repository = MemoryDocumentRepository::new();
        assert!(matches!(
            repository.get_or_create_folder("  ").await,
            Err(StorageError::InvalidFolderName(_))
        ));
    }

    #[tokio::test]
    async fn documents_list_newest_first_and_delete_returns_the_record() {
        let repository = MemoryDocumentRepository::new();
        repository.save(document("old", 10)).await.unwrap();
        repository.save(document("new", 1)).await.unwrap();

        let ids: Vec<_> = repository
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|document| document.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        let removed = repository.delete("old").await.unwrap();
        assert_eq!(removed.map(|document| document.id).as_deref(), Some("old"));
        assert!(repository.get_by_id("old").await.unwrap().is_none());
        assert!(repository.delete("old").await.unwrap().is_none());
    }
}
