use crate::error::IngestError;
use crate::models::Chunk;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Upper bound per chunk, counted in characters.
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits `text` every `max_chars` characters with no overlap.
///
/// Cuts may land mid-word. Concatenating the returned chunks in order
/// yields `text` unchanged.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == config.max_chars {
            chunks.push(Chunk {
                index: chunks.len(),
                text: text[start..offset].to_string(),
            });
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(Chunk {
            index: chunks.len(),
            text: text[start..].to_string(),
        });
    }

    Ok(chunks)
}

/// Stable point id for a chunk, so re-ingesting a document overwrites its points.
pub fn point_id(document_id: &str, chunk_index: usize) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((chunk_index as u64).to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}
