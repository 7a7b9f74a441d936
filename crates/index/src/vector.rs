use crate::embeddings::Embedder;
use crate::{AssembledGraph, VectorError};
use async_trait::async_trait;
use ingest::Chunk;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// One embedded chunk, keyed by a point id derived from its chunk id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// Stable point id: the leading 64 bits of the sha256 chunk id
pub fn point_id(chunk_id: &str) -> Result<u64, VectorError> {
    chunk_id
        .get(..16)
        .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
        .ok_or_else(|| VectorError::InvalidChunkId(chunk_id.to_string()))
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace points; returns how many were accepted
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<usize, VectorError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub document_id: String,
    pub chunks_indexed: usize,
    pub batches: usize,
}

/// Embeds chunk text and upserts it, tagged with the entities extracted
/// from each chunk.
pub struct ChunkIndexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl ChunkIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub async fn index_chunks(
        &self,
        graph: &AssembledGraph,
        chunks: &[Chunk],
    ) -> Result<IndexSummary, VectorError> {
        let mut entity_ids: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for node in &graph.nodes {
            entity_ids.entry(node.chunk_index).or_default().push(&node.id);
        }

        let mut summary = IndexSummary {
            document_id: graph.document_id.clone(),
            ..Default::default()
        };

        for batch in chunks.chunks(self.batch_size) {
            let mut points = Vec::with_capacity(batch.len());
            for chunk in batch {
                let vector = self.embedder.embed(&chunk.text).await?;
                let entities = entity_ids.get(&chunk.index).cloned().unwrap_or_default();
                points.push(ChunkPoint {
                    id: point_id(&chunk.chunk_id)?,
                    vector,
                    payload: json!({
                        "chunk_id": chunk.chunk_id,
                        "doc_id": chunk.doc_id,
                        "index": chunk.index,
                        "text": chunk.text,
                        "source": chunk.source,
                        "start": chunk.offset.0,
                        "end": chunk.offset.1,
                        "entity_ids": entities,
                    }),
                });
            }

            summary.chunks_indexed += self.store.upsert(points).await?;
            summary.batches += 1;
            debug!(doc_id = %summary.document_id, batch = summary.batches, "Chunk batch indexed");
        }

        info!(
            doc_id = %summary.document_id,
            chunks = summary.chunks_indexed,
            model = self.embedder.model_name(),
            "Chunks indexed"
        );
        Ok(summary)
    }
}

/// Vector store kept in process memory
#[derive(Default)]
pub struct MemoryVectorStore {
    points: Mutex<BTreeMap<u64, ChunkPoint>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point(&self, id: u64) -> Option<ChunkPoint> {
        self.points.lock().ok().and_then(|p| p.get(&id).cloned())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<usize, VectorError> {
        let mut stored = self
            .points
            .lock()
            .map_err(|_| VectorError::Rejected("vector store lock poisoned".to_string()))?;
        let count = points.len();
        for point in points {
            stored.insert(point.id, point);
        }
        Ok(count)
    }
}
