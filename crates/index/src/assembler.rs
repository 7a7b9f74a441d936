use extract::{ChunkOutcome, Properties};
use ingest::{Chunk, Document};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledNode {
    pub id: String,
    pub label: String,
    pub chunk_index: usize,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledEdge {
    pub relation: String,
    pub source: String,
    pub target: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub source: String,
    pub doc_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterRecord {
    pub id: String,
    pub title: String,
    pub seq: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkRecord {
    pub id: String,
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Document structure written next to the extracted entities
#[derive(Debug, Clone, Serialize)]
pub struct LexicalGraph {
    pub document: DocumentRecord,
    pub chapters: Vec<ChapterRecord>,
    pub chunks: Vec<ChunkRecord>,
}

impl LexicalGraph {
    pub fn from_document(document: &Document, chunks: &[Chunk]) -> Self {
        Self {
            document: DocumentRecord {
                id: document.doc_id.clone(),
                title: document.metadata.title.clone(),
                author: document.metadata.author.clone(),
                source: document.source.clone(),
                doc_type: document.metadata.doc_type.as_str().to_string(),
            },
            chapters: document
                .chapters
                .iter()
                .map(|c| ChapterRecord {
                    id: format!("{}:chapter:{}", document.doc_id, c.seq),
                    title: c.title.clone(),
                    seq: c.seq,
                })
                .collect(),
            chunks: chunks
                .iter()
                .map(|c| ChunkRecord {
                    id: c.chunk_id.clone(),
                    index: c.index,
                    text: c.text.clone(),
                    start: c.offset.0,
                    end: c.offset.1,
                })
                .collect(),
        }
    }

    pub fn chunk_id(&self, index: usize) -> Option<&str> {
        self.chunks
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.id.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledGraph {
    pub document_id: String,
    pub nodes: Vec<AssembledNode>,
    pub edges: Vec<AssembledEdge>,
    pub skipped_chunks: Vec<usize>,
    pub dropped_edges: usize,
    pub lexical: Option<LexicalGraph>,
}

impl AssembledGraph {
    pub fn with_lexical(mut self, lexical: LexicalGraph) -> Self {
        self.lexical = Some(lexical);
        self
    }

    /// Edges whose endpoints are not nodes of this graph. Always empty for
    /// graphs built by `GraphAssembler`.
    pub fn dangling_edges(&self) -> Vec<&AssembledEdge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }
}

/// Node ids are made global as `{document}:{chunk}:{local}`. Nothing is
/// merged across chunks.
pub struct GraphAssembler {
    document_id: String,
}

impl GraphAssembler {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self { document_id: document_id.into() }
    }

    pub fn global_id(&self, chunk_index: usize, local_id: &str) -> String {
        format!("{}:{}:{}", self.document_id, chunk_index, local_id)
    }

    pub fn assemble(&self, outcomes: &[ChunkOutcome]) -> AssembledGraph {
        let mut ordered: Vec<&ChunkOutcome> = outcomes.iter().collect();
        ordered.sort_by_key(|o| o.chunk_index());

        let mut nodes: Vec<AssembledNode> = Vec::new();
        let mut node_index: HashMap<String, usize> = HashMap::new();
        let mut edges: Vec<AssembledEdge> = Vec::new();
        let mut edge_index: HashMap<(String, String, String), usize> = HashMap::new();
        let mut skipped_chunks = Vec::new();
        let mut pending_edges = Vec::new();

        for outcome in ordered {
            let tagged = match outcome {
                ChunkOutcome::Extracted(tagged) => tagged,
                ChunkOutcome::Skipped { chunk_index, .. } => {
                    skipped_chunks.push(*chunk_index);
                    continue;
                }
            };

            for node in &tagged.fragment.nodes {
                let id = self.global_id(tagged.chunk_index, &node.id);
                match node_index.get(&id) {
                    Some(&existing) => merge_properties(&mut nodes[existing].properties, &node.properties),
                    None => {
                        node_index.insert(id.clone(), nodes.len());
                        nodes.push(AssembledNode {
                            id,
                            label: node.label.clone(),
                            chunk_index: tagged.chunk_index,
                            properties: node.properties.clone(),
                        });
                    }
                }
            }

            for edge in &tagged.fragment.edges {
                pending_edges.push(AssembledEdge {
                    relation: edge.relation.clone(),
                    source: self.global_id(tagged.chunk_index, &edge.source),
                    target: self.global_id(tagged.chunk_index, &edge.target),
                    properties: edge.properties.clone(),
                });
            }
        }

        let mut dropped_edges = 0;
        for edge in pending_edges {
            if !node_index.contains_key(&edge.source) || !node_index.contains_key(&edge.target) {
                dropped_edges += 1;
                continue;
            }

            let key = (edge.source.clone(), edge.relation.clone(), edge.target.clone());
            match edge_index.get(&key) {
                Some(&existing) => merge_properties(&mut edges[existing].properties, &edge.properties),
                None => {
                    edge_index.insert(key, edges.len());
                    edges.push(edge);
                }
            }
        }

        debug!(
            doc_id = %self.document_id,
            nodes = nodes.len(),
            edges = edges.len(),
            skipped = skipped_chunks.len(),
            dropped_edges,
            "Assembled graph"
        );

        AssembledGraph {
            document_id: self.document_id.clone(),
            nodes,
            edges,
            skipped_chunks,
            dropped_edges,
            lexical: None,
        }
    }
}

/// Earlier values win; keys only present in `incoming` are added
fn merge_properties(existing: &mut Properties, incoming: &Properties) {
    for (key, value) in incoming {
        existing.entry(key.clone()).or_insert_with(|| value.clone());
    }
}
