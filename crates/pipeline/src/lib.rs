pub mod config;
pub mod dag;
pub mod error;
pub mod stages;

pub use config::{
    ChunkingConfig, ExtractionConfig, GraphConfig, LlmConfig, LlmProvider, Neo4jConfig,
    PipelineConfig, RetryConfig, VectorConfig,
};
pub use dag::{
    step, Component, Flow, FlowExt, Join, Pipeline, RunContext, RunResult, StageReport, Step, Then,
};
pub use error::{ConfigError, PipelineError};
pub use stages::{
    AssembleStage, AssembledDocument, ChunkStage, ChunkedDocument, ExtractStage, ExtractedDocument,
    LoadStage, RunInput, SchemaStage, VectorStage, WriteStage,
};

use extract::{Extractor, LanguageModel, OllamaClient, OpenAiClient, Schema};
use index::{
    ChunkIndexer, Embedder, GraphStore, IndexSummary, OllamaEmbedder, QdrantIndexer, VectorError,
    WriteSummary, RESERVED_LABELS,
};
use ingest::Chunker;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type IngestFlow = Then<
    Then<
        Then<Join<Then<Step<LoadStage>, Step<ChunkStage>>, Step<SchemaStage>>, Step<ExtractStage>>,
        Step<AssembleStage>,
    >,
    Join<Step<WriteStage>, Step<VectorStage>>,
>;

/// What one run left behind in the graph and vector stores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub chunks_indexed: usize,
}

impl IngestSummary {
    fn new(written: WriteSummary, indexed: IndexSummary) -> Self {
        Self {
            document_id: written.document_id,
            nodes_written: written.nodes_written,
            relationships_written: written.relationships_written,
            chunks_indexed: indexed.chunks_indexed,
        }
    }
}

/// Load, chunk, extract, assemble, then write and index one document.
///
/// Loading and chunking run alongside schema preparation; extraction waits
/// for both. The graph writer and the chunk indexer run side by side once
/// the graph is assembled.
pub struct KnowledgeGraphPipeline {
    pipeline: Pipeline<IngestFlow>,
}

impl KnowledgeGraphPipeline {
    pub fn new(
        config: &PipelineConfig,
        schema: Arc<Schema>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn GraphStore>,
        vectors: Option<ChunkIndexer>,
    ) -> Result<Self, PipelineError> {
        let reserved = schema
            .entities()
            .iter()
            .find(|e| RESERVED_LABELS.contains(&e.label.as_str()));
        if let Some(entity) = reserved {
            return Err(ConfigError::Invalid(format!(
                "entity label {} is reserved for the lexical graph",
                entity.label
            ))
            .into());
        }

        let chunker = Chunker::new(config.chunker_config()?);
        let extractor = Extractor::new(model, config.extractor_config());

        let flow = step(LoadStage)
            .then(step(ChunkStage::new(chunker)))
            .join(step(SchemaStage::new(schema)))
            .then(step(ExtractStage::new(extractor)))
            .then(step(AssembleStage::new(config.graph.lexical_graph)))
            .then(step(WriteStage::new(store)).join(step(VectorStage::new(vectors))));

        Ok(Self {
            pipeline: Pipeline::new(flow)?,
        })
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.pipeline.stage_names()
    }

    /// Run the whole flow for one file. Nothing is written unless every
    /// stage before the writer succeeds.
    pub async fn run(
        &self,
        path: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<RunResult<IngestSummary>, PipelineError> {
        let path = path.into();
        info!(path = %path.display(), "Starting knowledge graph run");

        match self.pipeline.run(RunInput { path: path.clone() }, cancel).await {
            Ok(RunResult { output: (written, indexed), stages }) => {
                let output = IngestSummary::new(written, indexed);
                info!(
                    path = %path.display(),
                    nodes = output.nodes_written,
                    relationships = output.relationships_written,
                    chunks_indexed = output.chunks_indexed,
                    "Knowledge graph run complete"
                );
                Ok(RunResult { output, stages })
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Knowledge graph run failed");
                Err(e)
            }
        }
    }
}

/// Build the language model client named by the configuration
pub fn build_model(config: &PipelineConfig) -> Result<Arc<dyn LanguageModel>, ConfigError> {
    let llm = &config.llm;
    let params = config.model_params();

    let model: Arc<dyn LanguageModel> = match llm.provider {
        LlmProvider::Ollama => Arc::new(
            OllamaClient::new(llm.base_url.clone(), llm.model.clone()).with_params(params),
        ),
        LlmProvider::OpenAi => {
            let api_key = llm.api_key.clone().ok_or_else(|| {
                ConfigError::Invalid("the openai provider requires llm.api_key".to_string())
            })?;
            Arc::new(
                OpenAiClient::new(llm.base_url.clone(), api_key, llm.model.clone())
                    .with_params(params),
            )
        }
    };

    Ok(model)
}

/// Build the chunk indexer when vector indexing is enabled, creating the
/// collection on first use
pub async fn build_chunk_indexer(
    config: &PipelineConfig,
) -> Result<Option<(ChunkIndexer, Arc<QdrantIndexer>)>, VectorError> {
    let vector = &config.vector;
    if !vector.enabled {
        return Ok(None);
    }

    let embedder = Arc::new(OllamaEmbedder::new(
        vector.embedding_base_url.clone(),
        vector.embedding_model.clone(),
    ));
    let dimension = embedder.dimension().await?;

    let qdrant = Arc::new(QdrantIndexer::new(vector.qdrant_url.clone(), vector.collection.clone()));
    qdrant.init_collection(dimension).await?;
    info!(collection = %vector.collection, dimension, "Vector index ready");

    let indexer = ChunkIndexer::new(embedder, qdrant.clone(), vector.batch_size);
    Ok(Some((indexer, qdrant)))
}
