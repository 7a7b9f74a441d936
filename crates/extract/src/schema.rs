use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid label {0:?}: labels must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidLabel(String),

    #[error("entity type {0} declared more than once")]
    DuplicateEntity(String),

    #[error("relation type {0} declared more than once")]
    DuplicateRelation(String),

    #[error("triple ({0}, {1}, {2}) references undeclared entity type {3}")]
    UndeclaredEntity(String, String, String, String),

    #[error("triple ({0}, {1}, {2}) references undeclared relation type {1}")]
    UndeclaredRelation(String, String, String),

    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl EntityType {
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self { label: label.into(), description: description.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationType {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl RelationType {
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self { label: label.into(), description: description.into() }
    }
}

/// (source entity label, relation label, target entity label)
pub type Triple = (String, String, String);

/// Unvalidated form, as written in a schema file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub entities: Vec<EntityType>,
    pub relations: Vec<RelationType>,
    #[serde(default)]
    pub triples: Vec<Triple>,
}

/// The closed set of entity labels, relation labels and the
/// (source, relation, target) triples allowed between them
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<EntityType>,
    relations: Vec<RelationType>,
    triples: BTreeSet<Triple>,
    entity_index: HashMap<String, usize>,
    relation_index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(
        entities: Vec<EntityType>,
        relations: Vec<RelationType>,
        triples: Vec<Triple>,
    ) -> Result<Self, SchemaError> {
        let mut entity_index = HashMap::new();
        for (i, entity) in entities.iter().enumerate() {
            check_label(&entity.label)?;
            if entity_index.insert(entity.label.clone(), i).is_some() {
                return Err(SchemaError::DuplicateEntity(entity.label.clone()));
            }
        }

        let mut relation_index = HashMap::new();
        for (i, relation) in relations.iter().enumerate() {
            check_label(&relation.label)?;
            if relation_index.insert(relation.label.clone(), i).is_some() {
                return Err(SchemaError::DuplicateRelation(relation.label.clone()));
            }
        }

        for (source, relation, target) in &triples {
            for label in [source, target] {
                if !entity_index.contains_key(label) {
                    return Err(SchemaError::UndeclaredEntity(
                        source.clone(),
                        relation.clone(),
                        target.clone(),
                        label.clone(),
                    ));
                }
            }
            if !relation_index.contains_key(relation) {
                return Err(SchemaError::UndeclaredRelation(
                    source.clone(),
                    relation.clone(),
                    target.clone(),
                ));
            }
        }

        Ok(Self {
            entities,
            relations,
            triples: triples.into_iter().collect(),
            entity_index,
            relation_index,
        })
    }

    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, SchemaError> {
        Self::new(definition.entities, definition.relations, definition.triples)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Self::from_definition(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Schema for study material: books, their writers and sections, and
    /// the concepts and people discussed in them. Labels stay clear of the
    /// ones the lexical graph writes.
    pub fn learning_default() -> Result<Self, SchemaError> {
        let triple = |s: &str, r: &str, t: &str| (s.to_string(), r.to_string(), t.to_string());

        let definition = SchemaDefinition {
            entities: vec![
                EntityType::new("Book", "A book or long-form document"),
                EntityType::new("Writer", "A person who wrote a book"),
                EntityType::new("Section", "A named chapter or section of a book"),
                EntityType::new(
                    "Concept",
                    "An idea, theory, technique or term explained in the text",
                ),
                EntityType::new("Person", "A person mentioned in the text"),
            ],
            relations: vec![
                RelationType::new("AUTHORED_BY", "The book was written by the writer"),
                RelationType::new("HAS_SECTION", "The book contains the section"),
                RelationType::new("EXPLAINS", "The section or book explains the concept"),
                RelationType::new("RELATED_TO", "Two concepts are related"),
                RelationType::new(
                    "PREREQUISITE_OF",
                    "Understanding the first concept is needed for the second",
                ),
                RelationType::new("CONTRIBUTED_TO", "The person contributed to the concept"),
            ],
            triples: vec![
                triple("Book", "AUTHORED_BY", "Writer"),
                triple("Book", "HAS_SECTION", "Section"),
                triple("Book", "EXPLAINS", "Concept"),
                triple("Section", "EXPLAINS", "Concept"),
                triple("Concept", "RELATED_TO", "Concept"),
                triple("Concept", "PREREQUISITE_OF", "Concept"),
                triple("Person", "CONTRIBUTED_TO", "Concept"),
            ],
        };

        Self::from_definition(definition)
    }

    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn relations(&self) -> &[RelationType] {
        &self.relations
    }

    pub fn triples(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    pub fn has_entity(&self, label: &str) -> bool {
        self.entity_index.contains_key(label)
    }

    pub fn has_relation(&self, label: &str) -> bool {
        self.relation_index.contains_key(label)
    }

    pub fn is_allowed(&self, source: &str, relation: &str, target: &str) -> bool {
        self.triples
            .contains(&(source.to_string(), relation.to_string(), target.to_string()))
    }

    pub fn to_definition(&self) -> SchemaDefinition {
        SchemaDefinition {
            entities: self.entities.clone(),
            relations: self.relations.clone(),
            triples: self.triples.iter().cloned().collect(),
        }
    }
}

fn check_label(label: &str) -> Result<(), SchemaError> {
    let mut chars = label.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidLabel(label.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_author() -> (Vec<EntityType>, Vec<RelationType>) {
        (
            vec![EntityType::new("DOCUMENT", ""), EntityType::new("AUTHOR", "")],
            vec![RelationType::new("AUTHORED_BY", "")],
        )
    }

    #[test]
    fn test_valid_schema() {
        let (entities, relations) = doc_author();
        let schema = Schema::new(
            entities,
            relations,
            vec![("DOCUMENT".into(), "AUTHORED_BY".into(), "AUTHOR".into())],
        )
        .unwrap();

        assert!(schema.is_allowed("DOCUMENT", "AUTHORED_BY", "AUTHOR"));
        assert!(!schema.is_allowed("DOCUMENT", "AUTHORED_BY", "DOCUMENT"));
    }

    #[test]
    fn test_undeclared_entity_in_triple() {
        let (entities, relations) = doc_author();
        let err = Schema::new(
            entities,
            relations,
            vec![("DOCUMENT".into(), "AUTHORED_BY".into(), "PUBLISHER".into())],
        )
        .unwrap_err();

        assert!(matches!(err, SchemaError::UndeclaredEntity(_, _, _, label) if label == "PUBLISHER"));
    }

    #[test]
    fn test_undeclared_relation_in_triple() {
        let (entities, relations) = doc_author();
        let err = Schema::new(
            entities,
            relations,
            vec![("DOCUMENT".into(), "CITES".into(), "DOCUMENT".into())],
        )
        .unwrap_err();

        assert!(matches!(err, SchemaError::UndeclaredRelation(..)));
    }

    #[test]
    fn test_labels_must_be_identifiers() {
        let err = Schema::new(vec![EntityType::new("Bad Label", "")], vec![], vec![]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidLabel(_)));

        let err = Schema::new(
            vec![EntityType::new("A", ""), EntityType::new("A", "")],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateEntity(_)));
    }

    #[test]
    fn test_from_json() {
        let schema = Schema::from_json_str(
            r#"{
                "entities": [{"label": "Concept", "description": "an idea"}],
                "relations": [{"label": "RELATED_TO"}],
                "triples": [["Concept", "RELATED_TO", "Concept"]]
            }"#,
        )
        .unwrap();

        assert!(schema.has_entity("Concept"));
        assert!(schema.has_relation("RELATED_TO"));
        assert_eq!(schema.triples().count(), 1);
    }

    #[test]
    fn test_learning_default_is_consistent() {
        let schema = Schema::learning_default().unwrap();
        assert!(schema.is_allowed("Book", "AUTHORED_BY", "Writer"));
        assert_eq!(schema.to_definition().entities.len(), 5);
    }

    #[test]
    fn test_learning_default_avoids_lexical_labels() {
        let schema = Schema::learning_default().unwrap();
        for label in ["Entity", "Document", "Chapter", "Chunk", "Author"] {
            assert!(!schema.has_entity(label), "{label} collides with the lexical graph");
        }
        assert!(schema.has_relation("HAS_SECTION"));
        assert!(!schema.has_relation("HAS_CHAPTER"));
    }
}
