pub mod assembler;
pub mod embeddings;
pub mod memory;
pub mod neo4j_index;
pub mod qdrant_index;
pub mod vector;

pub use assembler::{AssembledEdge, AssembledGraph, AssembledNode, GraphAssembler, LexicalGraph};
pub use embeddings::{Embedder, OllamaEmbedder};
pub use memory::MemoryGraphStore;
pub use neo4j_index::{GraphStats, Neo4jIndexer};
pub use qdrant_index::QdrantIndexer;
pub use vector::{ChunkIndexer, ChunkPoint, IndexSummary, MemoryVectorStore, VectorStore};

use async_trait::async_trait;
use extract::Properties;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to graph store: {0}")]
    Connection(#[source] neo4rs::Error),

    #[error("graph store write failed during {operation}: {source}")]
    Write {
        operation: String,
        #[source]
        source: neo4rs::Error,
    },

    #[error("graph store rejected write: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("model {0} returned an empty embedding")]
    EmptyEmbedding(String),

    #[error("chunk id is not a sha256 hex digest: {0}")]
    InvalidChunkId(String),

    #[error("vector store rejected write: {0}")]
    Rejected(String),
}

/// Result of one committed write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub document_id: String,
    pub nodes_written: usize,
    pub relationships_written: usize,
}

/// A persistent destination for assembled graphs. A write either commits
/// every node and relationship or none of them.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn write_graph(&self, graph: &AssembledGraph) -> Result<WriteSummary, StoreError>;
}

pub const ENTITY_LABEL: &str = "Entity";
pub const DOCUMENT_LABEL: &str = "Document";
pub const CHAPTER_LABEL: &str = "Chapter";
pub const CHUNK_LABEL: &str = "Chunk";
pub const AUTHOR_LABEL: &str = "Author";

/// Labels owned by the store itself; extracted entities may not use them
pub const RESERVED_LABELS: [&str; 5] =
    [ENTITY_LABEL, DOCUMENT_LABEL, CHAPTER_LABEL, CHUNK_LABEL, AUTHOR_LABEL];

/// One statement of a graph write, in execution order
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Node {
        /// Label the node is matched on (indexed on `id`)
        key_label: &'static str,
        /// Additional, schema-derived label
        label: Option<String>,
        id: String,
        properties: Properties,
    },
    Relationship {
        rel_type: String,
        source_label: &'static str,
        source: String,
        target_label: &'static str,
        target: String,
        properties: Properties,
    },
}

impl WriteOp {
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node { .. })
    }
}

/// Flatten a graph into write operations: every node first, then every
/// relationship, so relationship endpoints always exist when created.
pub fn plan_writes(graph: &AssembledGraph) -> Vec<WriteOp> {
    let mut nodes = Vec::new();
    let mut relationships = Vec::new();

    let rel = |rel_type: &str, source_label, source: &str, target_label, target: &str| {
        WriteOp::Relationship {
            rel_type: rel_type.to_string(),
            source_label,
            source: source.to_string(),
            target_label,
            target: target.to_string(),
            properties: Properties::new(),
        }
    };

    if let Some(lexical) = &graph.lexical {
        let doc = &lexical.document;
        nodes.push(WriteOp::Node {
            key_label: DOCUMENT_LABEL,
            label: None,
            id: doc.id.clone(),
            properties: props([
                ("title", json!(doc.title)),
                ("source", json!(doc.source)),
                ("type", json!(doc.doc_type)),
            ]),
        });

        if let Some(author) = &doc.author {
            nodes.push(WriteOp::Node {
                key_label: AUTHOR_LABEL,
                label: None,
                id: author.clone(),
                properties: props([("name", json!(author))]),
            });
            relationships.push(rel("WROTE", AUTHOR_LABEL, author, DOCUMENT_LABEL, &doc.id));
        }

        for chapter in &lexical.chapters {
            nodes.push(WriteOp::Node {
                key_label: CHAPTER_LABEL,
                label: None,
                id: chapter.id.clone(),
                properties: props([("title", json!(chapter.title)), ("seq", json!(chapter.seq))]),
            });
            relationships.push(rel("HAS_CHAPTER", DOCUMENT_LABEL, &doc.id, CHAPTER_LABEL, &chapter.id));
        }

        for chunk in &lexical.chunks {
            nodes.push(WriteOp::Node {
                key_label: CHUNK_LABEL,
                label: None,
                id: chunk.id.clone(),
                properties: props([
                    ("index", json!(chunk.index)),
                    ("text", json!(chunk.text)),
                    ("start", json!(chunk.start)),
                    ("end", json!(chunk.end)),
                ]),
            });
            relationships.push(rel("PART_OF", CHUNK_LABEL, &chunk.id, DOCUMENT_LABEL, &doc.id));
        }

        for pair in lexical.chunks.windows(2) {
            relationships.push(rel("NEXT_CHUNK", CHUNK_LABEL, &pair[0].id, CHUNK_LABEL, &pair[1].id));
        }
    }

    for node in &graph.nodes {
        nodes.push(WriteOp::Node {
            key_label: ENTITY_LABEL,
            label: Some(node.label.clone()),
            id: node.id.clone(),
            properties: node.properties.clone(),
        });

        if let Some(chunk_id) = graph.lexical.as_ref().and_then(|l| l.chunk_id(node.chunk_index)) {
            relationships.push(rel("FROM_CHUNK", ENTITY_LABEL, &node.id, CHUNK_LABEL, chunk_id));
        }
    }

    for edge in &graph.edges {
        relationships.push(WriteOp::Relationship {
            rel_type: edge.relation.clone(),
            source_label: ENTITY_LABEL,
            source: edge.source.clone(),
            target_label: ENTITY_LABEL,
            target: edge.target.clone(),
            properties: edge.properties.clone(),
        });
    }

    nodes.extend(relationships);
    nodes
}

fn props<const N: usize>(entries: [(&str, serde_json::Value); N]) -> Properties {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
