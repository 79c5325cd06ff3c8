use crate::chunking::{chunk_text, point_id, ChunkingConfig};
use crate::embeddings::EmbeddingProvider;
use crate::extractor::{is_supported, mime_type_for, TextExtractor};
use crate::models::{ChunkPayload, Document, Folder, IndexPoint, PayloadFilter};
use crate::traits::{BlobStore, DocumentRepository, VectorIndex};
use crate::IngestError;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Chunk, embed and index one document's text.
pub struct IngestionPipeline<E, V> {
    embedder: E,
    index: V,
    chunking: ChunkingConfig,
    collection: String,
}

impl<E, V> IngestionPipeline<E, V>
where
    E: EmbeddingProvider,
    V: VectorIndex,
{
    pub fn new(
        embedder: E,
        index: V,
        chunking: ChunkingConfig,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates the collection with the embedder's dimension if it is missing.
    pub async fn prepare(&self) -> Result<(), IngestError> {
        self.index
            .ensure_collection(&self.collection, self.embedder.dimensions())
            .await?;
        Ok(())
    }

    /// Returns the number of chunks indexed.
    ///
    /// Every chunk is embedded before anything is written, so a failed
    /// embedding leaves the index untouched for this document.
    pub async fn ingest(&self, document: &Document) -> Result<usize, IngestError> {
        let chunks = chunk_text(&document.content, self.chunking)?;
        if chunks.is_empty() {
            info!(document_id = %document.id, "document has no text, nothing indexed");
            return Ok(0);
        }

        let vectors =
            try_join_all(chunks.iter().map(|chunk| self.embedder.embed(&chunk.text))).await?;

        let folder_id = document.folder_id().map(str::to_string);
        let points: Vec<IndexPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint {
                id: point_id(&document.id, chunk.index),
                vector,
                payload: ChunkPayload {
                    document_id: document.id.clone(),
                    chunk_index: chunk.index,
                    text: chunk.text,
                    folder_id: folder_id.clone(),
                },
            })
            .collect();

        self.prepare().await?;
        self.index.upsert(&self.collection, &points).await?;

        info!(
            document_id = %document.id,
            chunks = points.len(),
            folder_id = ?folder_id,
            "document indexed"
        );
        Ok(points.len())
    }

    pub async fn remove(&self, document_id: &str) -> Result<(), IngestError> {
        self.index
            .delete_points(&self.collection, &PayloadFilter::document(document_id))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// How an upload names its target folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderSelector {
    Id(String),
    Name(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDocument {
    pub id: String,
    pub file_name: String,
    pub url: String,
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct DirectoryReport {
    pub folder: Folder,
    pub ingested: Vec<UploadedDocument>,
    pub skipped: Vec<SkippedFile>,
}

/// Upload and deletion workflow across blob storage, metadata and the index.
pub struct DocumentLibrary<E, V, D, B> {
    pipeline: IngestionPipeline<E, V>,
    documents: D,
    blobs: B,
    extractor: Arc<dyn TextExtractor>,
    public_url: String,
}

impl<E, V, D, B> DocumentLibrary<E, V, D, B>
where
    E: EmbeddingProvider,
    V: VectorIndex,
    D: DocumentRepository,
    B: BlobStore,
{
    pub fn new(
        pipeline: IngestionPipeline<E, V>,
        documents: D,
        blobs: B,
        extractor: Arc<dyn TextExtractor>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            documents,
            blobs,
            extractor,
            public_url: public_url.into(),
        }
    }

    pub fn pipeline(&self) -> &IngestionPipeline<E, V> {
        &self.pipeline
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn content_url(&self, file_path: &str) -> String {
        format!("{}/uploads/{}", self.public_url.trim_end_matches('/'), file_path)
    }

    pub async fn resolve_folder(&self, selector: &FolderSelector) -> Result<Folder, IngestError> {
        match selector {
            FolderSelector::Id(id) => self
                .documents
                .get_folder(id)
                .await?
                .ok_or_else(|| IngestError::FolderNotFound(id.clone())),
            FolderSelector::Name(name) => Ok(self.documents.get_or_create_folder(name).await?),
        }
    }

    /// Stores and indexes each file in order, stopping at the first failure.
    pub async fn upload(
        &self,
        files: Vec<UploadedFile>,
        folder: Option<FolderSelector>,
    ) -> Result<Vec<UploadedDocument>, IngestError> {
        if files.is_empty() {
            return Err(IngestError::InvalidArgument("no files uploaded".to_string()));
        }

        let folder = match &folder {
            Some(selector) => Some(self.resolve_folder(selector).await?),
            None => None,
        };

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            uploaded.push(self.store(file, folder.clone()).await?);
        }
        Ok(uploaded)
    }

    async fn store(
        &self,
        file: UploadedFile,
        folder: Option<Folder>,
    ) -> Result<UploadedDocument, IngestError> {
        let UploadedFile { file_name, bytes } = file;
        let extractor = Arc::clone(&self.extractor);
        let name = file_name.clone();
        let (extracted, bytes) = tokio::task::spawn_blocking(move || {
            let text = extractor.extract(&name, &bytes);
            (text, bytes)
        })
        .await
        .map_err(|error| IngestError::Task(error.to_string()))?;
        let content = extracted?;

        let id = Uuid::new_v4().to_string();
        let file_path = storage_key(&id, &file_name);

        self.blobs.save(&file_path, &bytes).await?;

        let document = Document {
            id: id.clone(),
            file_name: file_name.clone(),
            file_size: bytes.len() as u64,
            mime_type: mime_type_for(&file_name).to_string(),
            file_path: file_path.clone(),
            content,
            uploaded_at: Utc::now(),
            folder,
            owner_id: None,
        };

        if let Err(error) = self.documents.save(document.clone()).await {
            self.discard_blob(&file_path).await;
            return Err(error.into());
        }

        if let Err(error) = self.pipeline.ingest(&document).await {
            warn!(document_id = %id, %error, "indexing failed, rolling back upload");
            if let Err(cleanup) = self.documents.delete(&id).await {
                warn!(document_id = %id, error = %cleanup, "could not remove document record");
            }
            self.discard_blob(&file_path).await;
            return Err(error);
        }

        Ok(UploadedDocument {
            id,
            file_name,
            url: self.content_url(&file_path),
        })
    }

    async fn discard_blob(&self, file_path: &str) {
        if let Err(error) = self.blobs.delete(file_path).await {
            warn!(path = file_path, %error, "could not remove stored file");
        }
    }

    /// Removes a document's points, stored file and record.
    pub async fn delete(&self, document_id: &str) -> Result<Document, IngestError> {
        let document = self
            .documents
            .get_by_id(document_id)
            .await?
            .ok_or_else(|| IngestError::DocumentNotFound(document_id.to_string()))?;

        self.pipeline.remove(document_id).await?;
        self.blobs.delete(&document.file_path).await?;
        self.documents.delete(document_id).await?;

        info!(document_id, "document deleted");
        Ok(document)
    }

    /// Ingests every supported file under `dir` into a folder named after it.
    /// Files whose text cannot be extracted are skipped and reported.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<DirectoryReport, IngestError> {
        let files = discover_documents(dir);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported documents found in {}",
                dir.display()
            )));
        }

        let folder_name = dir
            .canonicalize()
            .ok()
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().to_string()))
            .unwrap_or_else(|| "imported".to_string());
        let folder = self.documents.get_or_create_folder(&folder_name).await?;

        let mut ingested = Vec::new();
        let mut skipped = Vec::new();

        for path in files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| {
                    IngestError::InvalidArgument(format!(
                        "path missing filename: {}",
                        path.display()
                    ))
                })?;
            let bytes = tokio::fs::read(&path).await?;

            match self
                .store(UploadedFile { file_name, bytes }, Some(folder.clone()))
                .await
            {
                Ok(document) => ingested.push(document),
                Err(IngestError::Extraction(error)) => {
                    warn!(path = %path.display(), %error, "skipping file");
                    skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
                Err(error) => return Err(error),
            }
        }

        Ok(DirectoryReport {
            folder,
            ingested,
            skipped,
        })
    }
}

/// Recursively lists files with a supported extension, sorted by path.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_supported(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

fn storage_key(id: &str, file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.is_empty() {
        id.to_string()
    } else {
        format!("{id}-{safe}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::DiskBlobStore;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::DocumentTextExtractor;
    use crate::repository::MemoryDocumentRepository;
    use crate::stores::MemoryVectorStore;
    use crate::embeddings::RetryingEmbedder;
    use crate::models::ScoredPoint;
    use crate::retry::RetryPolicy;
    use crate::{EmbeddingError, ExtractError, IndexError};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::fs;
    use tempfile::tempdir;

    const COLLECTION: &str = "docs";

    /// Fails permanently on any chunk containing the marker text.
    struct PoisonedEmbedder {
        inner: CharacterNgramEmbedder,
    }

    #[async_trait]
    impl EmbeddingProvider for PoisonedEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        fn model_name(&self) -> &str {
            "poisoned"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("POISON") {
                return Err(EmbeddingError::Provider("bad input".to_string()));
            }
            self.inner.embed(text).await
        }
    }

    type TestLibrary<E> =
        DocumentLibrary<E, Arc<MemoryVectorStore>, Arc<MemoryDocumentRepository>, DiskBlobStore>;

    fn library<E: EmbeddingProvider>(
        embedder: E,
        root: &Path,
    ) -> (TestLibrary<E>, Arc<MemoryVectorStore>, Arc<MemoryDocumentRepository>) {
        let index = Arc::new(MemoryVectorStore::new());
        let documents = Arc::new(MemoryDocumentRepository::new());
        let pipeline = IngestionPipeline::new(
            embedder,
            Arc::clone(&index),
            ChunkingConfig { max_chars: 10 },
            COLLECTION,
        );
        let library = DocumentLibrary::new(
            pipeline,
            Arc::clone(&documents),
            DiskBlobStore::new(root),
            Arc::new(DocumentTextExtractor),
            "http://localhost:4000/",
        );
        (library, index, documents)
    }

    fn text_file(name: &str, text: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    fn document(id: &str, content: &str) -> Document {
        Document {
            id: id.to_string(),
            file_name: "a.txt".to_string(),
            file_size: content.len() as u64,
            mime_type: "text/plain".to_string(),
            file_path: "a.txt".to_string(),
            content: content.to_string(),
            uploaded_at: Utc::now(),
            folder: None,
            owner_id: None,
        }
    }

    #[tokio::test]
    async fn one_failed_chunk_leaves_no_points() {
        let index = Arc::new(MemoryVectorStore::new());
        let pipeline = IngestionPipeline::new(
            PoisonedEmbedder {
                inner: CharacterNgramEmbedder::default(),
            },
            Arc::clone(&index),
            ChunkingConfig { max_chars: 8 },
            COLLECTION,
        );
        pipeline.prepare().await.unwrap();

        let result = pipeline
            .ingest(&document("doc", "aaaaaaa POISON_ bbbbbbb"))
            .await;

        assert!(matches!(result, Err(IngestError::Embedding(EmbeddingError::Provider(_)))));
        assert_eq!(index.point_count(COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn ingest_indexes_every_chunk_and_remove_clears_them() {
        let index = Arc::new(MemoryVectorStore::new());
        let pipeline = IngestionPipeline::new(
            CharacterNgramEmbedder::default(),
            Arc::clone(&index),
            ChunkingConfig { max_chars: 5 },
            COLLECTION,
        );

        assert_eq!(pipeline.ingest(&document("doc", "abcdefghijkl")).await.unwrap(), 3);
        assert_eq!(index.point_count(COLLECTION).await, 3);

        pipeline.remove("doc").await.unwrap();
        assert_eq!(index.point_count(COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn empty_text_indexes_nothing() {
        let index = Arc::new(MemoryVectorStore::new());
        let pipeline = IngestionPipeline::new(
            CharacterNgramEmbedder::default(),
            Arc::clone(&index),
            ChunkingConfig::default(),
            COLLECTION,
        );
        assert_eq!(pipeline.ingest(&document("doc", "")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upload_into_named_folder_then_delete() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let (library, index, documents) = library(CharacterNgramEmbedder::default(), dir.path());

        let uploaded = library
            .upload(
                vec![text_file("pump notes.txt", "pump pressure is twenty bar")],
                Some(FolderSelector::Name("Manuals".to_string())),
            )
            .await?;

        assert_eq!(uploaded.len(), 1);
        let id = uploaded[0].id.clone();
        assert_eq!(
            uploaded[0].url,
            format!("http://localhost:4000/uploads/{id}-pump_notes.txt")
        );

        let stored = documents.get_by_id(&id).await?.expect("document saved");
        assert_eq!(stored.folder.as_ref().map(|folder| folder.name.as_str()), Some("Manuals"));
        assert_eq!(stored.mime_type, "text/plain");
        assert!(dir.path().join(&stored.file_path).exists());
        assert_eq!(index.point_count(COLLECTION).await, 3);

        library.delete(&id).await?;
        assert_eq!(index.point_count(COLLECTION).await, 0);
        assert!(documents.get_by_id(&id).await?.is_none());
        assert!(!dir.path().join(&stored.file_path).exists());

        assert!(matches!(
            library.delete(&id).await,
            Err(IngestError::DocumentNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn failed_indexing_rolls_back_the_upload() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = PoisonedEmbedder {
            inner: CharacterNgramEmbedder::default(),
        };
        let (library, index, documents) = library(embedder, dir.path());

        let result = library
            .upload(vec![text_file("bad.txt", "fine text POISON here")], None)
            .await;

        assert!(result.is_err());
        assert!(documents.get_all().await?.is_empty());
        assert_eq!(index.point_count(COLLECTION).await, 0);
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_folder_id_and_unsupported_files_are_rejected() {
        let dir = tempdir().unwrap();
        let (library, _index, documents) = library(CharacterNgramEmbedder::default(), dir.path());

        let missing = library
            .upload(
                vec![text_file("a.txt", "text")],
                Some(FolderSelector::Id("nope".to_string())),
            )
            .await;
        assert!(matches!(missing, Err(IngestError::FolderNotFound(_))));

        let unsupported = library.upload(vec![text_file("a.xlsx", "x")], None).await;
        assert!(matches!(
            unsupported,
            Err(IngestError::Extraction(ExtractError::UnsupportedFormat(_)))
        ));
        assert!(documents.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn directory_ingest_skips_unreadable_files() -> Result<(), Box<dyn std::error::Error>> {
        let source = tempdir()?;
        let uploads = tempdir()?;
        let nested = source.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(source.path().join("a.txt"), "alpha text")?;
        fs::write(nested.join("b.md"), "# beta")?;
        fs::write(nested.join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(source.path().join("ignored.bin"), b"\x00")?;

        assert_eq!(discover_documents(source.path()).len(), 3);

        let (library, _index, documents) =
            library(CharacterNgramEmbedder::default(), uploads.path());
        let report = library.ingest_directory(source.path()).await?;

        assert_eq!(report.ingested.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken.pdf"));
        assert!(documents
            .get_all()
            .await?
            .iter()
            .all(|document| document.folder.as_ref() == Some(&report.folder)));
        Ok(())
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let source = tempdir().unwrap();
        let uploads = tempdir().unwrap();
        let (library, _index, _documents) =
            library(CharacterNgramEmbedder::default(), uploads.path());
        assert!(matches!(
            library.ingest_directory(source.path()).await,
            Err(IngestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn storage_keys_are_flat_and_safe() {
        assert_eq!(storage_key("id", "../../etc/passwd"), "id-passwd");
        assert_eq!(storage_key("id", "my file.pdf"), "id-my_file.pdf");
        assert_eq!(storage_key("id", ""), "id");
    }

    /// Rate-limits the first request for any chunk carrying the marker and
    /// records when each successful call returned.
    struct ThrottledEmbedder {
        inner: CharacterNgramEmbedder,
        started: tokio::time::Instant,
        throttled: std::sync::atomic::AtomicBool,
        finished: std::sync::Mutex<Vec<(String, std::time::Duration)>>,
    }

    #[async_trait]
    impl EmbeddingProvider for ThrottledEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        fn model_name(&self) -> &str {
            "throttled"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("SLOW") && !self.throttled.swap(true, Ordering::SeqCst) {
                return Err(EmbeddingError::RateLimited);
            }
            self.finished
                .lock()
                .unwrap()
                .push((text.to_string(), self.started.elapsed()));
            self.inner.embed(text).await
        }
    }

    /// Memory index that remembers when each upsert arrived.
    struct RecordingIndex {
        inner: MemoryVectorStore,
        started: tokio::time::Instant,
        upserts: std::sync::Mutex<Vec<(usize, std::time::Duration)>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
            self.inner.ensure_collection(name, dimension).await
        }

        async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
            self.inner.delete_collection(name).await
        }

        async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<(), IndexError> {
            self.upserts
                .lock()
                .unwrap()
                .push((points.len(), self.started.elapsed()));
            self.inner.upsert(collection, points).await
        }

        async fn search(
            &self,
            collection: &str,
            query_vector: &[f32],
            limit: usize,
            filter: Option<&PayloadFilter>,
        ) -> Result<Vec<ScoredPoint>, IndexError> {
            self.inner.search(collection, query_vector, limit, filter).await
        }

        async fn delete_points(
            &self,
            collection: &str,
            filter: &PayloadFilter,
        ) -> Result<(), IndexError> {
            self.inner.delete_points(collection, filter).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_on_one_chunk_does_not_hold_up_the_rest() {
        let started = tokio::time::Instant::now();
        let base_delay = std::time::Duration::from_secs(2);
        let embedder = Arc::new(ThrottledEmbedder {
            inner: CharacterNgramEmbedder::default(),
            started,
            throttled: std::sync::atomic::AtomicBool::new(false),
            finished: std::sync::Mutex::new(Vec::new()),
        });
        let index = Arc::new(RecordingIndex {
            inner: MemoryVectorStore::new(),
            started,
            upserts: std::sync::Mutex::new(Vec::new()),
        });
        let chunking = ChunkingConfig { max_chars: 10 };
        let pipeline = IngestionPipeline::new(
            RetryingEmbedder::new(Arc::clone(&embedder), RetryPolicy::new(5, base_delay)),
            Arc::clone(&index),
            chunking,
            COLLECTION,
        );

        let text = "SLOW alpha bravo charlie delta echo foxtrot";
        let expected = chunk_text(text, chunking).unwrap().len();
        assert!(expected > 2);

        let indexed = pipeline.ingest(&document("doc-1", text)).await.unwrap();
        assert_eq!(indexed, expected);

        let finished = embedder.finished.lock().unwrap().clone();
        assert_eq!(finished.len(), expected);
        for (chunk, elapsed) in &finished {
            if chunk.contains("SLOW") {
                assert!(*elapsed >= base_delay, "{chunk:?} retried after {elapsed:?}");
            } else {
                assert!(*elapsed < base_delay, "{chunk:?} waited {elapsed:?}");
            }
        }

        let upserts = index.upserts.lock().unwrap().clone();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, expected);
        assert!(upserts[0].1 >= base_delay);
    }
}
