use crate::vector::{ChunkPoint, VectorStore};
use crate::VectorError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const SERVICE: &str = "qdrant";

#[derive(Debug, Deserialize)]
struct CollectionsResponse {
    result: CollectionList,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    collections: Vec<CollectionName>,
}

#[derive(Debug, Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<usize>,
}

/// Chunk vectors in a Qdrant collection, over its REST API
pub struct QdrantIndexer {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

impl QdrantIndexer {
    pub fn new(base_url: String, collection: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            client: reqwest::Client::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Create the collection with cosine distance unless it already exists
    pub async fn init_collection(&self, dimension: usize) -> Result<(), VectorError> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await.map_err(request_err)?;
        let collections: CollectionsResponse =
            check(response).await?.json().await.map_err(request_err)?;

        if collections.result.collections.iter().any(|c| c.name == self.collection) {
            info!(collection = %self.collection, "Collection already exists");
            return Ok(());
        }

        info!(collection = %self.collection, dimension, "Creating collection");
        let response = self
            .client
            .put(self.collection_url())
            .json(&collection_body(dimension))
            .send()
            .await
            .map_err(request_err)?;
        check(response).await?;

        Ok(())
    }

    pub async fn point_count(&self) -> Result<usize, VectorError> {
        let url = self.collection_url();
        let response = self.client.get(&url).send().await.map_err(request_err)?;
        let info: CollectionInfoResponse = check(response).await?.json().await.map_err(request_err)?;
        Ok(info.result.points_count.unwrap_or(0))
    }
}

#[async_trait]
impl VectorStore for QdrantIndexer {
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<usize, VectorError> {
        if points.is_empty() {
            return Ok(0);
        }

        let count = points.len();
        let url = format!("{}/points?wait=true", self.collection_url());
        let response = self
            .client
            .put(&url)
            .json(&upsert_body(&points))
            .send()
            .await
            .map_err(request_err)?;
        check(response).await?;

        debug!(collection = %self.collection, points = count, "Points upserted");
        Ok(count)
    }
}

fn collection_body(dimension: usize) -> Value {
    json!({
        "vectors": {
            "size": dimension,
            "distance": "Cosine"
        }
    })
}

fn upsert_body(points: &[ChunkPoint]) -> Value {
    json!({ "points": points })
}

fn request_err(source: reqwest::Error) -> VectorError {
    VectorError::Request { service: SERVICE, source }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, VectorError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(VectorError::Status { service: SERVICE, status, body })
}
