use crate::{
    plan_writes, AssembledGraph, GraphStore, StoreError, WriteOp, WriteSummary, AUTHOR_LABEL,
    CHAPTER_LABEL, CHUNK_LABEL, DOCUMENT_LABEL, ENTITY_LABEL,
};
use async_trait::async_trait;
use extract::Properties;
use neo4rs::{BoltType, Graph, Query};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct Neo4jIndexer {
    graph: Graph,
}

impl Neo4jIndexer {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, StoreError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(StoreError::Connection)?;
        info!(uri, "Connected to Neo4j");
        Ok(Self::new(graph))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Initialize schema: uniqueness constraints on every keyed label
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Creating Neo4j constraints...");

        for label in [ENTITY_LABEL, DOCUMENT_LABEL, CHAPTER_LABEL, CHUNK_LABEL, AUTHOR_LABEL] {
            let name = format!("{}_id_unique", label.to_lowercase());
            let query = Query::new(format!(
                "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{label}) REQUIRE n.id IS UNIQUE"
            ));
            self.graph.run(query).await.map_err(|source| StoreError::Write {
                operation: format!("create constraint {name}"),
                source,
            })?;
        }

        let query = Query::new(
            "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)".to_string()
        );
        self.graph.run(query).await.map_err(|source| StoreError::Write {
            operation: "create index entity_name_index".to_string(),
            source,
        })?;

        info!("Neo4j constraints created successfully");
        Ok(())
    }

    /// Get graph statistics
    pub async fn get_stats(&self) -> Result<GraphStats, StoreError> {
        Ok(GraphStats {
            document_count: self.count("MATCH (d:Document) RETURN count(d) as count").await?,
            entity_count: self.count("MATCH (e:Entity) RETURN count(e) as count").await?,
            relation_count: self
                .count("MATCH (:Entity)-[r]->(:Entity) RETURN count(r) as count")
                .await?,
        })
    }

    async fn count(&self, cypher: &str) -> Result<usize, StoreError> {
        let read_err = |source| StoreError::Write { operation: cypher.to_string(), source };

        let mut result = self
            .graph
            .execute(Query::new(cypher.to_string()))
            .await
            .map_err(read_err)?;

        let count = if let Some(row) = result.next().await.map_err(read_err)? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };
        Ok(count)
    }
}

#[async_trait]
impl GraphStore for Neo4jIndexer {
    async fn write_graph(&self, graph: &AssembledGraph) -> Result<WriteSummary, StoreError> {
        let ops = plan_writes(graph);
        let mut summary = WriteSummary {
            document_id: graph.document_id.clone(),
            ..WriteSummary::default()
        };

        let mut txn = self.graph.start_txn().await.map_err(|source| StoreError::Write {
            operation: "begin transaction".to_string(),
            source,
        })?;

        for op in &ops {
            if let Err(source) = txn.run(to_query(op)).await {
                warn!(doc_id = %graph.document_id, error = %source, "Write failed, rolling back");
                if let Err(e) = txn.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
                return Err(StoreError::Write { operation: describe(op), source });
            }

            if op.is_node() {
                summary.nodes_written += 1;
            } else {
                summary.relationships_written += 1;
            }
        }

        txn.commit().await.map_err(|source| StoreError::Write {
            operation: "commit".to_string(),
            source,
        })?;

        debug!(
            doc_id = %graph.document_id,
            nodes = summary.nodes_written,
            relationships = summary.relationships_written,
            "Graph committed"
        );

        Ok(summary)
    }
}

/// Labels and relationship types are interpolated; they are restricted to
/// identifiers when the schema is built.
pub fn to_query(op: &WriteOp) -> Query {
    match op {
        WriteOp::Node { key_label, label, id, properties } => {
            let extra_label = label
                .as_ref()
                .map(|l| format!(" SET n:`{l}`"))
                .unwrap_or_default();
            Query::new(format!(
                "MERGE (n:`{key_label}` {{id: $id}}){extra_label} SET n += $props"
            ))
            .param("id", id.clone())
            .param("props", bolt_properties(properties))
        }
        WriteOp::Relationship { rel_type, source_label, source, target_label, target, properties } => {
            Query::new(format!(
                "MATCH (s:`{source_label}` {{id: $source}}) \
                 MATCH (t:`{target_label}` {{id: $target}}) \
                 MERGE (s)-[r:`{rel_type}`]->(t) SET r += $props"
            ))
            .param("source", source.clone())
            .param("target", target.clone())
            .param("props", bolt_properties(properties))
        }
    }
}

fn describe(op: &WriteOp) -> String {
    match op {
        WriteOp::Node { key_label, id, .. } => format!("merge {key_label} node {id}"),
        WriteOp::Relationship { rel_type, source, target, .. } => {
            format!("merge {rel_type} relationship {source} -> {target}")
        }
    }
}

fn bolt_properties(properties: &Properties) -> HashMap<String, BoltType> {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), to_bolt(v)))
        .collect()
}

/// Scalars map to their Bolt equivalents; arrays and objects are stored as JSON text
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => BoltType::from(i),
            (None, Some(f)) => BoltType::from(f),
            _ => BoltType::from(n.to_string()),
        },
        Value::String(s) => BoltType::from(s.clone()),
        other => BoltType::from(other.to_string()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub document_count: usize,
    pub entity_count: usize,
    pub relation_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_ops() {
        let op = WriteOp::Relationship {
            rel_type: "RELATED_TO".to_string(),
            source_label: ENTITY_LABEL,
            source: "d:0:a".to_string(),
            target_label: ENTITY_LABEL,
            target: "d:0:b".to_string(),
            properties: Properties::new(),
        };
        assert_eq!(describe(&op), "merge RELATED_TO relationship d:0:a -> d:0:b");
    }

    #[test]
    fn test_bolt_conversion() {
        let props: Properties = [
            ("name".to_string(), json!("Ferris")),
            ("legs".to_string(), json!(10)),
            ("tags".to_string(), json!(["crab", "mascot"])),
        ]
        .into_iter()
        .collect();

        let bolt = bolt_properties(&props);
        assert_eq!(bolt["name"], BoltType::from("Ferris".to_string()));
        assert_eq!(bolt["legs"], BoltType::from(10i64));
        assert_eq!(bolt["tags"], BoltType::from(r#"["crab","mascot"]"#.to_string()));
    }
}
