use crate::embeddings::EmbeddingProvider;
use crate::models::{
    ChatRequest, Conversation, PayloadFilter, RetrievalMode, RetrievalOptions, ScoredPoint,
    SourceDocument,
};
use crate::traits::{DocumentRepository, VectorIndex};
use crate::RetrievalError;
use std::collections::HashSet;
use tracing::{debug, info};

const DOCUMENT_INSTRUCTION: &str =
    "You are an AI assistant that answers questions based on the provided PDF content.";
const LIBRARY_INSTRUCTION: &str = "You are an AI assistant that answers questions using excerpts \
     retrieved from the user's document library. Base your answer on the excerpts and say so when \
     they do not contain the answer.";
const NO_EXCERPTS: &str = "No relevant excerpts were found in the library.";

/// Everything needed to start streaming one answer.
#[derive(Debug, Clone)]
pub struct PreparedChat {
    pub mode: RetrievalMode,
    pub conversation: Conversation,
    /// Documents to announce before the answer, in first-hit order.
    pub sources: Vec<SourceDocument>,
    pub hits: Vec<ScoredPoint>,
}

pub struct RetrievalOrchestrator<E, V, D> {
    embedder: E,
    index: V,
    documents: D,
    options: RetrievalOptions,
}

impl<E, V, D> RetrievalOrchestrator<E, V, D>
where
    E: EmbeddingProvider,
    V: VectorIndex,
    D: DocumentRepository,
{
    pub fn new(embedder: E, index: V, documents: D, options: RetrievalOptions) -> Self {
        Self {
            embedder,
            index,
            documents,
            options,
        }
    }

    /// Builds a fresh conversation for `request`. Fails before any model call.
    pub async fn prepare(&self, request: &ChatRequest) -> Result<PreparedChat, RetrievalError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }

        let mode = request.mode();
        info!(mode = mode.label(), "preparing chat context");

        match &mode {
            RetrievalMode::SingleDocument(document_id) => {
                let document = self
                    .documents
                    .get_by_id(document_id)
                    .await?
                    .ok_or_else(|| RetrievalError::DocumentNotFound(document_id.clone()))?;

                let conversation = Conversation::new()
                    .system(DOCUMENT_INSTRUCTION)
                    .system(format!(
                        "Here is the content of the PDF document:\n\n{}",
                        document.content
                    ))
                    .user(question);

                Ok(PreparedChat {
                    mode,
                    conversation,
                    sources: Vec::new(),
                    hits: Vec::new(),
                })
            }
            RetrievalMode::Library => {
                let hits = self.search(question, None).await?;
                self.assemble(mode, question, hits).await
            }
            RetrievalMode::Folder(folder_id) => {
                if self.documents.get_folder(folder_id).await?.is_none() {
                    return Err(RetrievalError::FolderNotFound(folder_id.clone()));
                }
                let filter = PayloadFilter::folder(folder_id.clone());
                let hits = self.search(question, Some(&filter)).await?;
                self.assemble(mode, question, hits).await
            }
        }
    }

    async fn search(
        &self,
        question: &str,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, RetrievalError> {
        let query_vector = self
            .embedder
            .embed(question)
            .await
            .map_err(RetrievalError::RetrievalFailed)?;

        let hits = self
            .index
            .search(
                &self.options.collection,
                &query_vector,
                self.options.top_k,
                filter,
            )
            .await?;

        debug!(hits = hits.len(), filtered = filter.is_some(), "vector search done");
        Ok(hits)
    }

    async fn assemble(
        &self,
        mode: RetrievalMode,
        question: &str,
        hits: Vec<ScoredPoint>,
    ) -> Result<PreparedChat, RetrievalError> {
        let mut conversation = Conversation::new().system(LIBRARY_INSTRUCTION);
        if hits.is_empty() {
            conversation = conversation.system(NO_EXCERPTS);
        }
        for hit in &hits {
            conversation = conversation.system(hit.payload.text.clone());
        }
        conversation = conversation.user(question);

        let sources = self.sources_for(&hits).await?;

        Ok(PreparedChat {
            mode,
            conversation,
            sources,
            hits,
        })
    }

    async fn sources_for(
        &self,
        hits: &[ScoredPoint],
    ) -> Result<Vec<SourceDocument>, RetrievalError> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();

        for hit in hits {
            let document_id = &hit.payload.document_id;
            if !seen.insert(document_id.clone()) {
                continue;
            }
            match self.documents.get_by_id(document_id).await? {
                Some(document) => sources.push(document.as_source()),
                None => debug!(document_id = %document_id, "indexed chunk has no document record"),
            }
        }

        Ok(sources)
    }
}
