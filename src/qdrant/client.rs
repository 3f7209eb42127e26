//! HTTP client wrapper writing chunks into, and retrieving them from, Qdrant.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::ingestion::{Chunk, SinkError, VectorSink};
use crate::qdrant::{
    filters::build_search_filter,
    payload::{ChunkPayload, generate_point_id},
    types::{
        CollectionSpec, PointStruct, QdrantError, QueryRequest, QueryResponse,
        QueryResponseResult, ScoredChunk, SearchFilterArgs, UpsertPointsRequest,
    },
};

/// Vector sink backed by one Qdrant collection.
pub struct QdrantStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: CollectionSpec,
    pub(crate) embedder: Arc<dyn EmbeddingClient>,
}

impl QdrantStore {
    /// Construct a store for `collection` at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: CollectionSpec,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("docrelay/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = collection.name(),
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection,
            embedder,
        })
    }

    /// Construct a store from the loaded configuration.
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, QdrantError> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            CollectionSpec::from_config(config)?,
            embedder,
        )
    }

    /// Collection this store writes into.
    pub fn collection(&self) -> &CollectionSpec {
        &self.collection
    }

    /// Create the collection and its payload indexes when missing.
    pub async fn ensure_collection(&self) -> Result<(), QdrantError> {
        if self.collection_exists().await? {
            tracing::debug!(collection = self.collection.name(), "Collection already present");
            return Ok(());
        }
        self.create_collection().await
    }

    /// Drop the collection (if present) and create it again empty.
    pub async fn recreate_collection(&self) -> Result<(), QdrantError> {
        let name = self.collection.name();
        let response = self
            .request(Method::DELETE, &format!("collections/{name}"))
            .send()
            .await?;

        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response, "delete collection").await?;
        }
        tracing::info!(collection = name, "Dropped collection");
        self.create_collection().await
    }

    /// Write one chunk, embedding it first when no vector is supplied.
    pub async fn upsert_chunk(
        &self,
        chunk: &Chunk,
        embedding: Option<Vec<f32>>,
    ) -> Result<(), SinkError> {
        let vector = match embedding {
            Some(vector) => vector,
            None => self
                .embedder
                .generate_embeddings(vec![chunk.content.clone()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| SinkError::Rejected("embedding provider returned no vector".into()))?,
        };

        if vector.len() as u64 != self.collection.vector_size() {
            return Err(SinkError::Rejected(format!(
                "vector has {} dimensions, collection {} expects {}",
                vector.len(),
                self.collection.name(),
                self.collection.vector_size()
            )));
        }

        let points = [PointStruct {
            id: generate_point_id(),
            vector,
            payload: ChunkPayload::from_chunk(chunk),
        }];

        let name = self.collection.name();
        let response = self
            .request(Method::PUT, &format!("collections/{name}/points"))
            .query(&[("wait", true)])
            .json(&UpsertPointsRequest { points: &points })
            .send()
            .await
            .map_err(QdrantError::from)?;
        ensure_success(response, "upsert points").await?;

        tracing::debug!(collection = name, page = chunk.page_num, "Point upserted");
        Ok(())
    }

    /// Embed `query` and return the closest chunks, optionally filtered.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilterArgs,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredChunk>, QdrantError> {
        let vector = self
            .embedder
            .generate_embeddings(vec![query.to_string()])
            .await
            .map_err(|error| QdrantError::Embedding(error.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| QdrantError::Embedding("no vector returned for query".into()))?;

        let name = self.collection.name();
        let body = QueryRequest {
            query: &vector,
            limit,
            with_payload: true,
            filter: build_search_filter(filter),
            score_threshold,
        };

        let response = self
            .request(Method::POST, &format!("collections/{name}/points/query"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        Ok(points
            .into_iter()
            .filter_map(|point| {
                point.payload.map(|payload| ScoredChunk {
                    id: stringify_point_id(point.id),
                    score: point.score,
                    payload,
                })
            })
            .collect())
    }

    async fn create_collection(&self) -> Result<(), QdrantError> {
        let name = self.collection.name();
        let response = self
            .request(Method::PUT, &format!("collections/{name}"))
            .json(&self.collection.create_request())
            .send()
            .await?;
        ensure_success(response, "create collection").await?;
        tracing::info!(
            collection = name,
            vector_size = self.collection.vector_size(),
            "Created collection"
        );

        for index in self.collection.payload_indexes() {
            let response = self
                .request(Method::PUT, &format!("collections/{name}/index"))
                .json(&index)
                .send()
                .await?;

            if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = name, field = index.field_name, "Payload index ensured");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = name, field = index.field_name, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let name = self.collection.name();
        let response = self
            .request(Method::GET, &format!("collections/{name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl VectorSink for QdrantStore {
    async fn upsert(&self, chunk: &Chunk, embedding: Option<Vec<f32>>) -> Result<(), SinkError> {
        self.upsert_chunk(chunk, embedding).await
    }
}

async fn ensure_success(response: reqwest::Response, action: &str) -> Result<(), QdrantError> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = QdrantError::UnexpectedStatus { status, body };
    tracing::error!(action, error = %error, "Qdrant request failed");
    Err(error)
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: serde_json::Value) -> String {
    match id {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalHashEmbedder;
    use crate::qdrant::types::Distance;
    use httpmock::{
        Method::{DELETE, GET, POST, PUT},
        MockServer,
    };
    use serde_json::json;

    fn store(server: &MockServer) -> QdrantStore {
        QdrantStore::new(
            &server.base_url(),
            Some("secret".into()),
            CollectionSpec::new("docs", 4, Distance::Cosine).unwrap(),
            Arc::new(LocalHashEmbedder::new(4)),
        )
        .expect("store")
    }

    fn chunk() -> Chunk {
        Chunk {
            content: "Leave requests go to HR.".into(),
            page_num: 3,
            total_pages: 5,
            title: "Handbook".into(),
            source: Some("intranet".into()),
            tags: vec!["hr".into()],
            created_at: 10,
        }
    }

    #[tokio::test]
    async fn upsert_embeds_and_writes_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs/points")
                    .query_param("wait", "true")
                    .header("api-key", "secret")
                    .json_body_partial(
                        r#"{"points":[{"payload":{"title":"Handbook","page_num":3,"total_pages":5,"tags":["hr"],"source":"intranet"}}]}"#,
                    );
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        store(&server).upsert(&chunk(), None).await.expect("upsert");
        mock.assert();
    }

    #[tokio::test]
    async fn upsert_rejects_mismatched_vectors() {
        let server = MockServer::start_async().await;
        let error = store(&server)
            .upsert(&chunk(), Some(vec![0.1, 0.2]))
            .await
            .unwrap_err();
        assert!(matches!(error, SinkError::Rejected(_)));
    }

    #[tokio::test]
    async fn upsert_surfaces_qdrant_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/points");
                then.status(500).body("storage failure");
            })
            .await;

        let error = store(&server).upsert(&chunk(), None).await.unwrap_err();
        assert!(matches!(
            error,
            SinkError::Qdrant(QdrantError::UnexpectedStatus { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn ensure_collection_creates_missing_collection() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs")
                    .json_body(json!({ "vectors": { "size": 4, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let index = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/index");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        store(&server).ensure_collection().await.expect("ensure");
        exists.assert();
        create.assert();
        index.assert_hits(3);
    }

    #[tokio::test]
    async fn recreate_collection_drops_then_creates() {
        let server = MockServer::start_async().await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/docs");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/index");
                then.status(409);
            })
            .await;

        store(&server).recreate_collection().await.expect("recreate");
        delete.assert();
        create.assert();
    }

    #[tokio::test]
    async fn search_sends_filter_and_parses_hits() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/query")
                    .json_body_partial(
                        r#"{"limit":3,"with_payload":true,"filter":{"must":[{"key":"tags","match":{"any":["hr"]}}]}}"#,
                    );
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": {
                        "points": [{
                            "id": "5b4f0c1e-0000-0000-0000-000000000001",
                            "score": 0.87,
                            "payload": {
                                "content": "Leave requests go to HR.",
                                "title": "Handbook",
                                "tags": ["hr"],
                                "page_num": 3,
                                "total_pages": 5,
                                "chunk_hash": "abc",
                                "created_at": 10,
                                "indexed_at": "2025-01-01T00:00:00Z"
                            }
                        }]
                    }
                }));
            })
            .await;

        let hits = store(&server)
            .search(
                "how do I request leave",
                &SearchFilterArgs {
                    tags: vec!["HR".into()],
                    title: None,
                },
                3,
                None,
            )
            .await
            .expect("search");

        mock.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.page_num, 3);
        assert!((hits[0].score - 0.87).abs() < f32::EPSILON);
    }
}
