use crate::dag::{Component, RunContext};
use crate::error::PipelineError;
use async_trait::async_trait;
use extract::{ChunkOutcome, Extractor, Schema};
use index::{
    AssembledGraph, ChunkIndexer, GraphAssembler, GraphStore, IndexSummary, LexicalGraph,
    WriteSummary,
};
use ingest::{Chunk, Chunker, Document, FileReader};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunInput {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ChunkedDocument {
    pub document: Arc<Document>,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub document: Arc<Document>,
    pub chunks: Vec<Chunk>,
    pub outcomes: Vec<ChunkOutcome>,
}

/// Shared by the graph writer and the chunk indexer
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub graph: AssembledGraph,
    pub chunks: Vec<Chunk>,
}

pub struct LoadStage;

#[async_trait]
impl Component for LoadStage {
    type Input = RunInput;
    type Output = Arc<Document>;

    fn name(&self) -> &str {
        "loader"
    }

    async fn run(
        &self,
        input: RunInput,
        _ctx: &RunContext,
    ) -> Result<Arc<Document>, PipelineError> {
        let document = FileReader::read_file(&input.path).await?;
        Ok(Arc::new(document))
    }

    fn summarize(&self, document: &Arc<Document>) -> Value {
        json!({
            "doc_id": document.doc_id,
            "title": document.metadata.title,
            "author": document.metadata.author,
            "doc_type": document.metadata.doc_type.as_str(),
            "chars": document.char_count(),
            "chapters": document.chapters.len(),
        })
    }
}

pub struct ChunkStage {
    chunker: Chunker,
}

impl ChunkStage {
    pub fn new(chunker: Chunker) -> Self {
        Self { chunker }
    }
}

#[async_trait]
impl Component for ChunkStage {
    type Input = Arc<Document>;
    type Output = ChunkedDocument;

    fn name(&self) -> &str {
        "chunker"
    }

    async fn run(
        &self,
        document: Arc<Document>,
        _ctx: &RunContext,
    ) -> Result<ChunkedDocument, PipelineError> {
        let chunks = self.chunker.chunk_document(&document);
        info!(doc_id = %document.doc_id, chunks = chunks.len(), "Document chunked");
        Ok(ChunkedDocument { document, chunks })
    }

    fn summarize(&self, output: &ChunkedDocument) -> Value {
        let config = self.chunker.config();
        json!({
            "chunks": output.chunks.len(),
            "chunk_size": config.chunk_size(),
            "overlap": config.overlap(),
        })
    }
}

/// Hands the run's schema to the extraction stage. Runs alongside loading.
pub struct SchemaStage {
    schema: Arc<Schema>,
}

impl SchemaStage {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Component for SchemaStage {
    type Input = RunInput;
    type Output = Arc<Schema>;

    fn name(&self) -> &str {
        "schema"
    }

    async fn run(
        &self,
        _input: RunInput,
        _ctx: &RunContext,
    ) -> Result<Arc<Schema>, PipelineError> {
        Ok(Arc::clone(&self.schema))
    }

    fn summarize(&self, schema: &Arc<Schema>) -> Value {
        json!({
            "entities": schema.entities().len(),
            "relations": schema.relations().len(),
            "triples": schema.triples().count(),
        })
    }
}

pub struct ExtractStage {
    extractor: Extractor,
}

impl ExtractStage {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Component for ExtractStage {
    type Input = (ChunkedDocument, Arc<Schema>);
    type Output = ExtractedDocument;

    fn name(&self) -> &str {
        "extractor"
    }

    async fn run(
        &self,
        (chunked, schema): (ChunkedDocument, Arc<Schema>),
        ctx: &RunContext,
    ) -> Result<ExtractedDocument, PipelineError> {
        let outcomes = self
            .extractor
            .extract_all(&chunked.chunks, &schema, ctx.cancellation())
            .await?;

        Ok(ExtractedDocument {
            document: chunked.document,
            chunks: chunked.chunks,
            outcomes,
        })
    }

    fn summarize(&self, output: &ExtractedDocument) -> Value {
        let skipped: Vec<Value> = output
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ChunkOutcome::Skipped { chunk_index, reason } => {
                    Some(json!({ "chunk_index": chunk_index, "reason": reason }))
                }
                ChunkOutcome::Extracted(_) => None,
            })
            .collect();

        json!({
            "extracted": output.outcomes.len() - skipped.len(),
            "skipped": skipped,
            "policy": self.extractor.config().on_error,
        })
    }
}

pub struct AssembleStage {
    lexical_graph: bool,
}

impl AssembleStage {
    pub fn new(lexical_graph: bool) -> Self {
        Self { lexical_graph }
    }
}

#[async_trait]
impl Component for AssembleStage {
    type Input = ExtractedDocument;
    type Output = Arc<AssembledDocument>;

    fn name(&self) -> &str {
        "assembler"
    }

    async fn run(
        &self,
        input: ExtractedDocument,
        _ctx: &RunContext,
    ) -> Result<Arc<AssembledDocument>, PipelineError> {
        let assembler = GraphAssembler::new(input.document.doc_id.clone());
        let mut graph = assembler.assemble(&input.outcomes);

        if !graph.skipped_chunks.is_empty() {
            warn!(
                doc_id = %graph.document_id,
                skipped = ?graph.skipped_chunks,
                "Graph is missing skipped chunks"
            );
        }

        if self.lexical_graph {
            graph = graph.with_lexical(LexicalGraph::from_document(&input.document, &input.chunks));
        }

        Ok(Arc::new(AssembledDocument { graph, chunks: input.chunks }))
    }

    fn summarize(&self, assembled: &Arc<AssembledDocument>) -> Value {
        let graph = &assembled.graph;
        json!({
            "nodes": graph.nodes.len(),
            "edges": graph.edges.len(),
            "dropped_edges": graph.dropped_edges,
            "skipped_chunks": graph.skipped_chunks,
            "lexical": graph.lexical.is_some(),
        })
    }
}

pub struct WriteStage {
    store: Arc<dyn GraphStore>,
}

impl WriteStage {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Component for WriteStage {
    type Input = Arc<AssembledDocument>;
    type Output = WriteSummary;

    fn name(&self) -> &str {
        "writer"
    }

    /// A started write runs to commit or failure
    fn interruptible(&self) -> bool {
        false
    }

    async fn run(
        &self,
        assembled: Arc<AssembledDocument>,
        _ctx: &RunContext,
    ) -> Result<WriteSummary, PipelineError> {
        let summary = self.store.write_graph(&assembled.graph).await?;
        info!(
            doc_id = %summary.document_id,
            nodes = summary.nodes_written,
            relationships = summary.relationships_written,
            "Graph written"
        );
        Ok(summary)
    }

    fn summarize(&self, summary: &WriteSummary) -> Value {
        serde_json::to_value(summary).unwrap_or(Value::Null)
    }
}

/// Embeds chunks into the vector store; a no-op when no indexer is set
pub struct VectorStage {
    indexer: Option<ChunkIndexer>,
}

impl VectorStage {
    pub fn new(indexer: Option<ChunkIndexer>) -> Self {
        Self { indexer }
    }

    pub fn disabled() -> Self {
        Self { indexer: None }
    }
}

#[async_trait]
impl Component for VectorStage {
    type Input = Arc<AssembledDocument>;
    type Output = IndexSummary;

    fn name(&self) -> &str {
        "vector_indexer"
    }

    fn interruptible(&self) -> bool {
        false
    }

    async fn run(
        &self,
        assembled: Arc<AssembledDocument>,
        _ctx: &RunContext,
    ) -> Result<IndexSummary, PipelineError> {
        let Some(indexer) = &self.indexer else {
            return Ok(IndexSummary {
                document_id: assembled.graph.document_id.clone(),
                ..Default::default()
            });
        };

        Ok(indexer.index_chunks(&assembled.graph, &assembled.chunks).await?)
    }

    fn summarize(&self, summary: &IndexSummary) -> Value {
        match &self.indexer {
            Some(indexer) => json!({
                "enabled": true,
                "model": indexer.model_name(),
                "chunks_indexed": summary.chunks_indexed,
                "batches": summary.batches,
            }),
            None => json!({ "enabled": false }),
        }
    }
}
