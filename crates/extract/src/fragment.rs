use crate::schema::Schema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use thiserror::Error;

// Reasoning models (deepseek-r1 and friends) prepend their chain of thought
static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"));
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid fence regex")
});

/// Why a single chunk's model output was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("malformed extraction: {0}")]
    Malformed(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

pub type Properties = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Only unique within the chunk it was extracted from
    pub id: String,
    pub label: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub relation: String,
    pub source: String,
    pub target: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphFragment {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(s) => s.trim().to_string(),
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawNode {
    id: RawId,
    label: String,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawEdge {
    #[serde(rename = "type")]
    relation: String,
    start_node_id: RawId,
    end_node_id: RawId,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawFragment {
    nodes: Vec<RawNode>,
    #[serde(default, alias = "edges")]
    relationships: Vec<RawEdge>,
}

fn into_properties(map: Option<Map<String, Value>>) -> Properties {
    map.unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .collect()
}

impl GraphFragment {
    /// Parse raw model output into a fragment. Does not consult the schema.
    pub fn parse(response: &str) -> Result<Self, FragmentError> {
        let json = strip_wrapping(response);
        if json.is_empty() {
            return Err(FragmentError::Malformed("empty model response".to_string()));
        }

        let raw: RawFragment =
            serde_json::from_str(&json).map_err(|e| FragmentError::Malformed(e.to_string()))?;

        let nodes = raw
            .nodes
            .into_iter()
            .map(|n| Node {
                id: n.id.into(),
                label: n.label.trim().to_string(),
                properties: into_properties(n.properties),
            })
            .collect();

        let edges = raw
            .relationships
            .into_iter()
            .map(|e| Edge {
                relation: e.relation.trim().to_string(),
                source: e.start_node_id.into(),
                target: e.end_node_id.into(),
                properties: into_properties(e.properties),
            })
            .collect();

        Ok(Self { nodes, edges })
    }

    /// Check every node and edge against the schema. The first problem found
    /// rejects the whole fragment.
    pub fn validate(&self, schema: &Schema) -> Result<(), FragmentError> {
        let mut labels: HashMap<&str, &str> = HashMap::new();

        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(FragmentError::Malformed("node with empty id".to_string()));
            }
            if !schema.has_entity(&node.label) {
                return Err(FragmentError::SchemaViolation(format!(
                    "node {} has undeclared label {}",
                    node.id, node.label
                )));
            }
            if let Some(previous) = labels.insert(&node.id, &node.label) {
                if previous != node.label {
                    return Err(FragmentError::Malformed(format!(
                        "node id {} used for both {} and {}",
                        node.id, previous, node.label
                    )));
                }
            }
        }

        for edge in &self.edges {
            let endpoint = |id: &str| {
                labels.get(id).copied().ok_or_else(|| {
                    FragmentError::Malformed(format!(
                        "{} edge references unknown node {}",
                        edge.relation, id
                    ))
                })
            };
            let source = endpoint(&edge.source)?;
            let target = endpoint(&edge.target)?;

            if !schema.has_relation(&edge.relation) {
                return Err(FragmentError::SchemaViolation(format!(
                    "undeclared relation type {}",
                    edge.relation
                )));
            }
            if !schema.is_allowed(source, &edge.relation, target) {
                return Err(FragmentError::SchemaViolation(format!(
                    "({source})-[{}]->({target}) is not an allowed triple",
                    edge.relation
                )));
            }
        }

        Ok(())
    }

    pub fn parse_validated(response: &str, schema: &Schema) -> Result<Self, FragmentError> {
        let fragment = Self::parse(response)?;
        fragment.validate(schema)?;
        Ok(fragment)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

fn strip_wrapping(response: &str) -> String {
    let without_thinking = THINK_BLOCK.replace_all(response, "");
    let trimmed = without_thinking.trim();

    match CODE_FENCE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityType, RelationType};

    fn schema() -> Schema {
        Schema::new(
            vec![EntityType::new("DOCUMENT", ""), EntityType::new("AUTHOR", "")],
            vec![RelationType::new("AUTHORED_BY", "")],
            vec![("DOCUMENT".into(), "AUTHORED_BY".into(), "AUTHOR".into())],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_valid_fragment() {
        let response = r#"{
            "nodes": [
                {"id": 0, "label": "DOCUMENT", "properties": {"title": "The Rust Book"}},
                {"id": "1", "label": "AUTHOR", "properties": {"name": "Steve Klabnik", "nickname": null}}
            ],
            "relationships": [
                {"type": "AUTHORED_BY", "start_node_id": 0, "end_node_id": "1", "properties": {}}
            ]
        }"#;

        let fragment = GraphFragment::parse_validated(response, &schema()).unwrap();
        assert_eq!(fragment.nodes.len(), 2);
        assert_eq!(fragment.nodes[0].id, "0");
        assert!(!fragment.nodes[1].properties.contains_key("nickname"));
        assert_eq!(fragment.edges[0].source, "0");
        assert_eq!(fragment.edges[0].target, "1");
    }

    #[test]
    fn test_parse_strips_fences_and_thinking() {
        let response = "<think>the text mentions a book</think>\n```json\n{\"nodes\": []}\n```";
        let fragment = GraphFragment::parse(response).unwrap();
        assert!(fragment.is_empty());
    }

    #[test]
    fn test_unparseable_is_malformed() {
        let err = GraphFragment::parse("Sure! Here are the entities: ...").unwrap_err();
        assert!(matches!(err, FragmentError::Malformed(_)));

        let err = GraphFragment::parse(r#"{"relationships": []}"#).unwrap_err();
        assert!(matches!(err, FragmentError::Malformed(_)));
    }

    #[test]
    fn test_document_to_document_is_schema_violation() {
        let response = r#"{
            "nodes": [
                {"id": "a", "label": "DOCUMENT"},
                {"id": "b", "label": "DOCUMENT"}
            ],
            "relationships": [
                {"type": "AUTHORED_BY", "start_node_id": "a", "end_node_id": "b"}
            ]
        }"#;

        let err = GraphFragment::parse_validated(response, &schema()).unwrap_err();
        assert!(matches!(err, FragmentError::SchemaViolation(_)));
    }

    #[test]
    fn test_undeclared_label_is_schema_violation() {
        let response = r#"{"nodes": [{"id": "a", "label": "PUBLISHER"}]}"#;
        let err = GraphFragment::parse_validated(response, &schema()).unwrap_err();
        assert!(matches!(err, FragmentError::SchemaViolation(_)));
    }

    #[test]
    fn test_dangling_edge_is_malformed() {
        let response = r#"{
            "nodes": [{"id": "a", "label": "DOCUMENT"}],
            "edges": [{"type": "AUTHORED_BY", "start_node_id": "a", "end_node_id": "z"}]
        }"#;
        let err = GraphFragment::parse_validated(response, &schema()).unwrap_err();
        assert!(matches!(err, FragmentError::Malformed(_)));
    }

    #[test]
    fn test_conflicting_duplicate_ids() {
        let response = r#"{"nodes": [
            {"id": "a", "label": "DOCUMENT"},
            {"id": "a", "label": "AUTHOR"}
        ]}"#;
        let err = GraphFragment::parse_validated(response, &schema()).unwrap_err();
        assert!(matches!(err, FragmentError::Malformed(_)));
    }
}
