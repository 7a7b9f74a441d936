mod error;
mod metrics;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use error::AppError;
use index::{GraphStore, MemoryGraphStore, Neo4jIndexer, QdrantIndexer};
use metrics::{Metrics, MetricsSnapshot, TimedOperation};
use pipeline::{IngestSummary, KnowledgeGraphPipeline, PipelineConfig, PipelineError, RunResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Where assembled graphs go
enum Backend {
    Neo4j(Arc<Neo4jIndexer>),
    /// Dry run: graphs are kept in process memory only
    Memory(Arc<MemoryGraphStore>),
}

impl Backend {
    fn store(&self) -> Arc<dyn GraphStore> {
        match self {
            Backend::Neo4j(indexer) => indexer.clone() as Arc<dyn GraphStore>,
            Backend::Memory(store) => store.clone() as Arc<dyn GraphStore>,
        }
    }
}

struct AppState {
    pipeline: KnowledgeGraphPipeline,
    backend: Backend,
    vectors: Option<Arc<QdrantIndexer>>,
    metrics: Metrics,
    shutdown: CancellationToken,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    graph_store: String,
    vector_store: String,
}

#[derive(Deserialize)]
struct IngestRequest {
    path: String,
}

#[derive(Serialize)]
struct StatsResponse {
    backend: &'static str,
    document_count: Option<usize>,
    node_count: usize,
    relation_count: usize,
    chunk_vectors: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    let config_path = std::env::var("CONFIG_PATH").ok().map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    let schema = Arc::new(config.load_schema().context("Failed to load extraction schema")?);
    let model = pipeline::build_model(&config)?;

    let backend = match std::env::var("GRAPH_STORE").as_deref() {
        Ok("memory") => {
            warn!("Using in-memory graph store; nothing will be persisted");
            Backend::Memory(Arc::new(MemoryGraphStore::new()))
        }
        _ => {
            let neo4j = &config.neo4j;
            let indexer = Neo4jIndexer::connect(&neo4j.uri, &neo4j.user, &neo4j.password)
                .await
                .context("Failed to connect to Neo4j")?;
            indexer.init_schema().await.context("Failed to initialize Neo4j schema")?;
            Backend::Neo4j(Arc::new(indexer))
        }
    };

    let (indexer, vectors) = match pipeline::build_chunk_indexer(&config)
        .await
        .context("Failed to prepare the vector index")?
    {
        Some((indexer, qdrant)) => (Some(indexer), Some(qdrant)),
        None => (None, None),
    };

    let pipeline = KnowledgeGraphPipeline::new(&config, schema, model, backend.store(), indexer)?;
    info!(
        stages = ?pipeline.stage_names(),
        model = %config.llm.model,
        vector_index = config.vector.enabled,
        "Pipeline ready"
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        pipeline,
        backend,
        vectors,
        metrics: Metrics::new(),
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_document))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down, cancelling in-flight runs");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let graph_store = match &state.backend {
        Backend::Neo4j(indexer) => match indexer.graph().run(neo4rs::query("RETURN 1")).await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        },
        Backend::Memory(_) => "memory".to_string(),
    };

    let vector_store = match &state.vectors {
        Some(qdrant) => match qdrant.point_count().await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        },
        None => "disabled".to_string(),
    };

    Json(HealthResponse {
        status: "ok",
        graph_store,
        vector_store,
    })
}

async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<RunResult<IngestSummary>>, AppError> {
    let timer = TimedOperation::start();
    let cancel = state.shutdown.child_token();

    match state.pipeline.run(PathBuf::from(&req.path), cancel).await {
        Ok(result) => {
            state.metrics.record_success(timer.elapsed(), &result);
            Ok(Json(result))
        }
        Err(e) => {
            state
                .metrics
                .record_failure(timer.elapsed(), matches!(e, PipelineError::Cancelled));
            Err(e.into())
        }
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, AppError> {
    let chunk_vectors = match &state.vectors {
        Some(qdrant) => Some(qdrant.point_count().await?),
        None => None,
    };

    let stats = match &state.backend {
        Backend::Neo4j(indexer) => {
            let stats = indexer.get_stats().await?;
            StatsResponse {
                backend: "neo4j",
                document_count: Some(stats.document_count),
                node_count: stats.entity_count,
                relation_count: stats.relation_count,
                chunk_vectors,
            }
        }
        Backend::Memory(store) => StatsResponse {
            backend: "memory",
            document_count: None,
            node_count: store.node_count(),
            relation_count: store.relationship_count(),
            chunk_vectors,
        },
    };

    Ok(Json(stats))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
