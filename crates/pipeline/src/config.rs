use crate::error::ConfigError;
use extract::{ErrorPolicy, ExtractorConfig, ModelParams, RetryPolicy, Schema, SchemaError};
use ingest::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub extraction: ExtractionConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub neo4j: Neo4jConfig,
    pub graph: GraphConfig,
    pub vector: VectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Characters per chunk
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_concurrent_llm_calls: usize,
    pub on_error: ErrorPolicy,
    pub repair_attempts: usize,
    /// JSON schema definition; the built-in learning schema when unset
    pub schema_path: Option<PathBuf>,
    pub examples: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_llm_calls: 5,
            on_error: ErrorPolicy::Raise,
            repair_attempts: 0,
            schema_path: None,
            examples: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown LLM provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub json_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            model: "deepseek-r1:7b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            max_tokens: Some(2000),
            temperature: Some(0.0),
            json_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Also write Document, Chapter and Chunk nodes
    pub lexical_graph: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { lexical_graph: true }
    }
}

/// Chunk embeddings in Qdrant, written alongside the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: bool,
    pub qdrant_url: String,
    pub collection: String,
    pub embedding_base_url: String,
    pub embedding_model: String,
    /// Points per upsert request
    pub batch_size: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            qdrant_url: "http://localhost:6333".to_string(),
            collection: "document_chunks".to_string(),
            embedding_base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            batch_size: 32,
        }
    }
}

impl PipelineConfig {
    /// Defaults, then `path` if given, then environment variables. Validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Apply overrides from a key lookup (normally the process environment)
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NEO4J_URI") {
            self.neo4j.uri = v;
        }
        if let Some(v) = lookup("NEO4J_USER") {
            self.neo4j.user = v;
        }
        if let Some(v) = lookup("NEO4J_PASSWORD") {
            self.neo4j.password = v;
        }

        if let Some(v) = lookup("LLM_PROVIDER") {
            self.llm.provider = parse("LLM_PROVIDER", v)?;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("LLM_API_KEY") {
            self.llm.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = Some(parse("LLM_TEMPERATURE", v)?);
        }
        if let Some(v) = lookup("LLM_MAX_TOKENS") {
            self.llm.max_tokens = Some(parse("LLM_MAX_TOKENS", v)?);
        }
        if let Some(v) = lookup("LLM_JSON_MODE") {
            self.llm.json_mode = parse("LLM_JSON_MODE", v)?;
        }

        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunking.chunk_size = parse("CHUNK_SIZE", v)?;
        }
        if let Some(v) = lookup("CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse("CHUNK_OVERLAP", v)?;
        }

        if let Some(v) = lookup("MAX_CONCURRENT_LLM_CALLS") {
            self.extraction.max_concurrent_llm_calls = parse("MAX_CONCURRENT_LLM_CALLS", v)?;
        }
        if let Some(v) = lookup("EXTRACTION_ON_ERROR") {
            self.extraction.on_error = parse("EXTRACTION_ON_ERROR", v)?;
        }
        if let Some(v) = lookup("EXTRACTION_REPAIR_ATTEMPTS") {
            self.extraction.repair_attempts = parse("EXTRACTION_REPAIR_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("SCHEMA_PATH") {
            self.extraction.schema_path = Some(PathBuf::from(v));
        }

        if let Some(v) = lookup("LEXICAL_GRAPH") {
            self.graph.lexical_graph = parse("LEXICAL_GRAPH", v)?;
        }

        if let Some(v) = lookup("VECTOR_INDEX") {
            self.vector.enabled = parse("VECTOR_INDEX", v)?;
        }
        if let Some(v) = lookup("QDRANT_URL") {
            self.vector.qdrant_url = v;
        }
        if let Some(v) = lookup("QDRANT_COLLECTION") {
            self.vector.collection = v;
        }
        if let Some(v) = lookup("EMBEDDING_BASE_URL") {
            self.vector.embedding_base_url = v;
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            self.vector.embedding_model = v;
        }
        if let Some(v) = lookup("EMBEDDING_BATCH_SIZE") {
            self.vector.batch_size = parse("EMBEDDING_BATCH_SIZE", v)?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunker_config()?;

        if self.extraction.max_concurrent_llm_calls == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_llm_calls must be at least 1".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".to_string()));
        }
        if self.llm.provider == LlmProvider::OpenAi && self.llm.api_key.is_none() {
            return Err(ConfigError::Invalid(
                "the openai provider requires llm.api_key (LLM_API_KEY)".to_string(),
            ));
        }
        if self.vector.enabled {
            if self.vector.batch_size == 0 {
                return Err(ConfigError::Invalid("vector.batch_size must be at least 1".to_string()));
            }
            if self.vector.collection.trim().is_empty() || self.vector.embedding_model.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "vector.collection and vector.embedding_model must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn chunker_config(&self) -> Result<ChunkerConfig, ConfigError> {
        Ok(ChunkerConfig::new(self.chunking.chunk_size, self.chunking.chunk_overlap)?)
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            json_mode: self.llm.json_mode,
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            max_concurrency: self.extraction.max_concurrent_llm_calls,
            on_error: self.extraction.on_error,
            repair_attempts: self.extraction.repair_attempts,
            examples: self.extraction.examples.clone(),
            retry: RetryPolicy::new(
                self.retry.max_retries,
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms,
            ),
        }
    }

    pub fn load_schema(&self) -> Result<Schema, SchemaError> {
        match &self.extraction.schema_path {
            Some(path) => Schema::from_file(path),
            None => Schema::learning_default(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunker_config().unwrap(), ChunkerConfig::new(4000, 200).unwrap());
        assert_eq!(config.extraction.on_error, ErrorPolicy::Raise);
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::default()
            .with_overrides(lookup(&[
                ("CHUNK_SIZE", "1000"),
                ("CHUNK_OVERLAP", "100"),
                ("EXTRACTION_ON_ERROR", "skip"),
                ("LLM_PROVIDER", "openai"),
                ("LLM_API_KEY", "sk-test"),
                ("LLM_MAX_TOKENS", "512"),
                ("LEXICAL_GRAPH", "false"),
            ]))
            .unwrap();

        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.extraction.on_error, ErrorPolicy::Skip);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.model_params().max_tokens, Some(512));
        assert!(!config.graph.lexical_graph);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_value() {
        let err = PipelineConfig::default()
            .with_overrides(lookup(&[("CHUNK_SIZE", "big")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "CHUNK_SIZE"));
    }

    #[test]
    fn test_overlap_rejected_at_validation() {
        let config = PipelineConfig::default()
            .with_overrides(lookup(&[("CHUNK_SIZE", "200"), ("CHUNK_OVERLAP", "200")]))
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Chunking(_))));
    }

    #[test]
    fn test_openai_requires_key() {
        let mut config = PipelineConfig::default();
        config.llm.provider = LlmProvider::OpenAi;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[chunking]\nchunk_size = 2000\n\n[extraction]\non_error = \"skip\"\nmax_concurrent_llm_calls = 2"
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 2000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.extraction.on_error, ErrorPolicy::Skip);
        assert_eq!(config.extractor_config().max_concurrency, 2);
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
    }

    #[test]
    fn test_vector_index_off_by_default() {
        let config = PipelineConfig::default();
        assert!(!config.vector.enabled);
        assert_eq!(config.vector.qdrant_url, "http://localhost:6333");
    }

    #[test]
    fn test_vector_overrides() {
        let config = PipelineConfig::default()
            .with_overrides(lookup(&[
                ("VECTOR_INDEX", "true"),
                ("QDRANT_COLLECTION", "books"),
                ("EMBEDDING_BATCH_SIZE", "0"),
            ]))
            .unwrap();

        assert!(config.vector.enabled);
        assert_eq!(config.vector.collection, "books");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_schema_when_no_path() {
        let schema = PipelineConfig::default().load_schema().unwrap();
        assert!(schema.has_entity("Concept"));
    }
}
