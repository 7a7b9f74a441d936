use crate::{plan_writes, AssembledGraph, GraphStore, StoreError, WriteOp, WriteSummary};
use async_trait::async_trait;
use extract::Properties;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub labels: BTreeSet<String>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    nodes: BTreeMap<String, StoredNode>,
    relationships: BTreeSet<(String, String, String)>,
}

/// Graph store kept in process memory. Each write is staged on a copy of
/// the current state and only swapped in once every operation applied.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: Mutex<MemoryState>,
    fail_after: Option<usize>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes fail once `ops` operations have been applied
    pub fn failing_after(ops: usize) -> Self {
        Self {
            state: Mutex::default(),
            fail_after: Some(ops),
        }
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().map(|s| s.nodes.len()).unwrap_or(0)
    }

    pub fn relationship_count(&self) -> usize {
        self.state.lock().map(|s| s.relationships.len()).unwrap_or(0)
    }

    pub fn node(&self, id: &str) -> Option<StoredNode> {
        self.state.lock().ok().and_then(|s| s.nodes.get(id).cloned())
    }

    pub fn has_relationship(&self, source: &str, rel_type: &str, target: &str) -> bool {
        self.state
            .lock()
            .map(|s| {
                s.relationships
                    .contains(&(source.to_string(), rel_type.to_string(), target.to_string()))
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn write_graph(&self, graph: &AssembledGraph) -> Result<WriteSummary, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Rejected("store state poisoned".to_string()))?;
        let mut staged = state.clone();

        let mut summary = WriteSummary {
            document_id: graph.document_id.clone(),
            ..WriteSummary::default()
        };

        for (applied, op) in plan_writes(graph).into_iter().enumerate() {
            if self.fail_after.is_some_and(|limit| applied >= limit) {
                return Err(StoreError::Rejected(format!("write aborted after {applied} operations")));
            }

            match op {
                WriteOp::Node { key_label, label, id, properties } => {
                    let node = staged.nodes.entry(id).or_insert_with(|| StoredNode {
                        labels: BTreeSet::new(),
                        properties: Properties::new(),
                    });
                    node.labels.insert(key_label.to_string());
                    node.labels.extend(label);
                    node.properties.extend(properties);
                    summary.nodes_written += 1;
                }
                WriteOp::Relationship { rel_type, source, target, .. } => {
                    if !staged.nodes.contains_key(&source) || !staged.nodes.contains_key(&target) {
                        return Err(StoreError::Rejected(format!(
                            "{rel_type} relationship between missing nodes {source} and {target}"
                        )));
                    }
                    staged.relationships.insert((source, rel_type, target));
                    summary.relationships_written += 1;
                }
            }
        }

        *state = staged;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssembledEdge, AssembledNode};

    fn graph(edges: Vec<AssembledEdge>) -> AssembledGraph {
        AssembledGraph {
            document_id: "doc".to_string(),
            nodes: vec![
                AssembledNode {
                    id: "doc:0:a".to_string(),
                    label: "Concept".to_string(),
                    chunk_index: 0,
                    properties: Properties::new(),
                },
                AssembledNode {
                    id: "doc:0:b".to_string(),
                    label: "Concept".to_string(),
                    chunk_index: 0,
                    properties: Properties::new(),
                },
            ],
            edges,
            skipped_chunks: vec![],
            dropped_edges: 0,
            lexical: None,
        }
    }

    fn edge(source: &str, target: &str) -> AssembledEdge {
        AssembledEdge {
            relation: "RELATED_TO".to_string(),
            source: source.to_string(),
            target: target.to_string(),
            properties: Properties::new(),
        }
    }

    #[tokio::test]
    async fn test_write_commits_everything() {
        let store = MemoryGraphStore::new();
        let summary = store.write_graph(&graph(vec![edge("doc:0:a", "doc:0:b")])).await.unwrap();

        assert_eq!(summary.nodes_written, 2);
        assert_eq!(summary.relationships_written, 1);
        assert!(store.has_relationship("doc:0:a", "RELATED_TO", "doc:0:b"));
        assert!(store.node("doc:0:a").unwrap().labels.contains("Entity"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_untouched() {
        let store = MemoryGraphStore::failing_after(1);
        let result = store.write_graph(&graph(vec![edge("doc:0:a", "doc:0:b")])).await;

        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_dangling_relationship_rejected() {
        let store = MemoryGraphStore::new();
        let result = store.write_graph(&graph(vec![edge("doc:0:a", "doc:9:z")])).await;

        assert!(result.is_err());
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.relationship_count(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let store = MemoryGraphStore::new();
        let g = graph(vec![edge("doc:0:a", "doc:0:b")]);
        store.write_graph(&g).await.unwrap();
        store.write_graph(&g).await.unwrap();

        assert_eq!(store.node_count(), 2);
        assert_eq!(store.relationship_count(), 1);
    }
}
