pub mod fragment;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use fragment::{Edge, FragmentError, GraphFragment, Node, Properties};
pub use llm::{LanguageModel, ModelError, ModelParams, OllamaClient, OpenAiClient};
pub use retry::RetryPolicy;
pub use schema::{EntityType, RelationType, Schema, SchemaDefinition, SchemaError, Triple};

use futures::stream::{FuturesUnordered, StreamExt};
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("chunk {chunk_index}: {source}")]
    Fragment {
        chunk_index: usize,
        #[source]
        source: FragmentError,
    },

    #[error("model call for chunk {chunk_index} failed: {source}")]
    Model {
        chunk_index: usize,
        #[source]
        source: ModelError,
    },

    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    /// Malformed output and schema violations follow the configured
    /// `ErrorPolicy`; everything else always aborts.
    pub fn is_policy_controlled(&self) -> bool {
        matches!(self, Self::Fragment { .. })
    }
}

/// What to do with a chunk whose model output cannot be used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Abort the whole run
    #[default]
    Raise,
    /// Log a warning and leave the chunk out of the graph
    Skip,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raise" => Ok(Self::Raise),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown error policy: {other} (expected raise or skip)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedFragment {
    pub chunk_index: usize,
    pub chunk_id: String,
    pub fragment: GraphFragment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChunkOutcome {
    Extracted(TaggedFragment),
    Skipped { chunk_index: usize, reason: String },
}

impl ChunkOutcome {
    pub fn chunk_index(&self) -> usize {
        match self {
            Self::Extracted(tagged) => tagged.chunk_index,
            Self::Skipped { chunk_index, .. } => *chunk_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub max_concurrency: usize,
    pub on_error: ErrorPolicy,
    /// Extra calls asking the model to fix unparseable output. 0 disables.
    pub repair_attempts: usize,
    /// Few-shot examples appended to every prompt
    pub examples: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            on_error: ErrorPolicy::Raise,
            repair_attempts: 0,
            examples: None,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    config: ExtractorConfig,
    gate: Semaphore,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: ExtractorConfig) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            model,
            config,
            gate: Semaphore::new(permits),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract a fragment from every chunk with at most `max_concurrency`
    /// model calls outstanding. Outcomes come back sorted by chunk index.
    pub async fn extract_all(
        &self,
        chunks: &[Chunk],
        schema: &Schema,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkOutcome>, ExtractionError> {
        info!(
            chunks = chunks.len(),
            max_concurrency = self.config.max_concurrency,
            policy = ?self.config.on_error,
            model = self.model.model_name(),
            "Extracting graph fragments"
        );

        let mut pending: FuturesUnordered<_> = chunks
            .iter()
            .map(|chunk| async move { (chunk, self.extract_gated(chunk, schema, cancel).await) })
            .collect();

        let mut outcomes = Vec::with_capacity(chunks.len());

        while let Some((chunk, result)) = pending.next().await {
            match result {
                Ok(fragment) => {
                    outcomes.push(ChunkOutcome::Extracted(TaggedFragment {
                        chunk_index: chunk.index,
                        chunk_id: chunk.chunk_id.clone(),
                        fragment,
                    }));
                }
                Err(err) if err.is_policy_controlled() && self.config.on_error == ErrorPolicy::Skip => {
                    warn!(chunk_index = chunk.index, error = %err, "Skipping chunk");
                    outcomes.push(ChunkOutcome::Skipped {
                        chunk_index: chunk.index,
                        reason: err.to_string(),
                    });
                }
                // Returning drops `pending`, which abandons the in-flight calls
                Err(err) => return Err(err),
            }
        }

        outcomes.sort_by_key(ChunkOutcome::chunk_index);

        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, ChunkOutcome::Skipped { .. }))
            .count();
        info!(extracted = outcomes.len() - skipped, skipped, "Extraction finished");

        Ok(outcomes)
    }

    async fn extract_gated(
        &self,
        chunk: &Chunk,
        schema: &Schema,
        cancel: &CancellationToken,
    ) -> Result<GraphFragment, ExtractionError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
            permit = self.gate.acquire() => permit.map_err(|_| ExtractionError::Cancelled)?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractionError::Cancelled),
            result = self.extract_chunk(chunk, schema) => result,
        }
    }

    /// Extract one chunk, ignoring the concurrency gate
    pub async fn extract_chunk(
        &self,
        chunk: &Chunk,
        schema: &Schema,
    ) -> Result<GraphFragment, ExtractionError> {
        debug!(
            chunk_index = chunk.index,
            estimated_tokens = chunk.estimated_tokens(),
            "Extracting chunk"
        );

        let prompt = prompt::build_extraction_prompt(schema, &chunk.text, self.config.examples.as_deref());
        let mut response = self.call_model(chunk.index, &prompt).await?;
        let mut repairs = 0;

        loop {
            match GraphFragment::parse_validated(&response, schema) {
                Ok(fragment) => {
                    debug!(
                        chunk_index = chunk.index,
                        nodes = fragment.nodes.len(),
                        edges = fragment.edges.len(),
                        "Chunk extracted"
                    );
                    return Ok(fragment);
                }
                Err(FragmentError::Malformed(reason)) if repairs < self.config.repair_attempts => {
                    repairs += 1;
                    debug!(chunk_index = chunk.index, attempt = repairs, %reason, "Requesting repaired output");
                    let retry_prompt = prompt::build_retry_prompt(&response);
                    response = self.call_model(chunk.index, &retry_prompt).await?;
                }
                Err(source) => {
                    return Err(ExtractionError::Fragment { chunk_index: chunk.index, source });
                }
            }
        }
    }

    async fn call_model(&self, chunk_index: usize, prompt: &str) -> Result<String, ExtractionError> {
        let model = &self.model;
        self.config
            .retry
            .retry_when("llm_generate", ModelError::is_transient, move || {
                model.generate(prompt)
            })
            .await
            .map_err(|source| ExtractionError::Model { chunk_index, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest::{Chunker, ChunkerConfig, Document, DocumentMetadata, DocumentType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const VALID: &str = r#"{
        "nodes": [
            {"id": "d", "label": "DOCUMENT", "properties": {"title": "t"}},
            {"id": "a", "label": "AUTHOR", "properties": {"name": "n"}}
        ],
        "relationships": [{"type": "AUTHORED_BY", "start_node_id": "d", "end_node_id": "a"}]
    }"#;

    /// Answers with the scripted response for the chunk whose text is the key,
    /// tracking how many calls are outstanding at once.
    struct ScriptedModel {
        responses: Mutex<Vec<(String, String)>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(responses: Vec<(&str, &str)>, delay: Duration) -> Self {
            Self {
                responses: Mutex::new(
                    responses.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                ),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let responses = self.responses.lock().unwrap();
            let response = responses
                .iter()
                .find(|(key, _)| prompt.contains(&format!("TEXT:\n{key}\n")))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| VALID.to_string());
            Ok(response)
        }
    }

    /// Always answers with the same HTTP status
    struct StatusModel {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for StatusModel {
        fn model_name(&self) -> &str {
            "status"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::Status { provider: "ollama", status: self.status, body: String::new() })
        }
    }

    fn schema() -> Schema {
        Schema::new(
            vec![EntityType::new("DOCUMENT", ""), EntityType::new("AUTHOR", "")],
            vec![RelationType::new("AUTHORED_BY", "")],
            vec![("DOCUMENT".into(), "AUTHORED_BY".into(), "AUTHOR".into())],
        )
        .unwrap()
    }

    /// Five chunks with texts "c0".."c4"
    fn chunks() -> Vec<Chunk> {
        let document = Document::new(
            "five.txt",
            "c0c1c2c3c4",
            DocumentMetadata { title: "five".into(), author: None, doc_type: DocumentType::Text },
        );
        Chunker::new(ChunkerConfig::new(2, 0).unwrap()).chunk_document(&document)
    }

    fn config(max_concurrency: usize, on_error: ErrorPolicy) -> ExtractorConfig {
        ExtractorConfig {
            max_concurrency,
            on_error,
            retry: RetryPolicy::none(),
            ..ExtractorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let model = Arc::new(ScriptedModel::new(vec![], Duration::from_millis(20)));
        let extractor = Extractor::new(model.clone(), config(2, ErrorPolicy::Raise));

        let outcomes = extractor
            .extract_all(&chunks(), &schema(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 5);
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
        assert_eq!(model.peak.load(Ordering::SeqCst), 2);
        let indices: Vec<_> = outcomes.iter().map(ChunkOutcome::chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_skip_policy_omits_bad_chunk() {
        let model = Arc::new(ScriptedModel::new(vec![("c2", "not json")], Duration::ZERO));
        let extractor = Extractor::new(model, config(3, ErrorPolicy::Skip));

        let outcomes = extractor
            .extract_all(&chunks(), &schema(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 5);
        assert!(matches!(&outcomes[2], ChunkOutcome::Skipped { chunk_index: 2, .. }));
        assert!(matches!(&outcomes[3], ChunkOutcome::Extracted(t) if t.chunk_index == 3));
    }

    #[tokio::test]
    async fn test_raise_policy_aborts() {
        let violating = r#"{
            "nodes": [{"id": "x", "label": "DOCUMENT"}, {"id": "y", "label": "DOCUMENT"}],
            "relationships": [{"type": "AUTHORED_BY", "start_node_id": "x", "end_node_id": "y"}]
        }"#;
        let model = Arc::new(ScriptedModel::new(vec![("c1", violating)], Duration::ZERO));
        let extractor = Extractor::new(model, config(2, ErrorPolicy::Raise));

        let err = extractor
            .extract_all(&chunks(), &schema(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExtractionError::Fragment { chunk_index: 1, source: FragmentError::SchemaViolation(_) }
        ));
    }

    #[tokio::test]
    async fn test_repair_attempt_recovers() {
        // The retry prompt does not contain the chunk text, so it gets VALID
        let model = Arc::new(ScriptedModel::new(vec![("c0", "{oops")], Duration::ZERO));
        let extractor = Extractor::new(
            model.clone(),
            ExtractorConfig { repair_attempts: 1, ..config(1, ErrorPolicy::Raise) },
        );

        let chunk = &chunks()[0];
        let fragment = extractor.extract_chunk(chunk, &schema()).await.unwrap();

        assert_eq!(fragment.nodes.len(), 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = Arc::new(ScriptedModel::new(vec![], Duration::from_millis(5)));
        let extractor = Extractor::new(model.clone(), config(1, ErrorPolicy::Skip));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = extractor.extract_all(&chunks(), &schema(), &cancel).await.unwrap_err();

        assert!(matches!(err, ExtractionError::Cancelled));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_policy_parsing() {
        assert_eq!("Skip".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Skip));
        assert_eq!("raise".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Raise));
        assert!("ignore".parse::<ErrorPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_only_transient_model_errors_retried() {
        let retrying = |status| {
            let model = Arc::new(StatusModel { status, calls: AtomicUsize::new(0) });
            let extractor = Extractor::new(
                model.clone(),
                ExtractorConfig {
                    retry: RetryPolicy::new(2, 1, 1),
                    ..config(1, ErrorPolicy::Raise)
                },
            );
            (model, extractor)
        };

        let (model, extractor) = retrying(400);
        let err = extractor.extract_chunk(&chunks()[0], &schema()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Model { chunk_index: 0, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let (model, extractor) = retrying(503);
        extractor.extract_chunk(&chunks()[0], &schema()).await.unwrap_err();
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }
}
