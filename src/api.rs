//! HTTP surface for docrelay.
//!
//! - `POST /documents` – Multipart upload (`file` PDF plus `metadata` JSON). Validation failures
//!   answer `400` with `{ "status": false, "message": ... }`; accepted uploads answer `200` with an
//!   NDJSON body carrying one `ProcessingStatus` per line, ending in `completed` or `failed`.
//!   Closing the connection mid-stream cancels the ingestion.
//! - `POST /search` – Embed a query and return the closest stored chunks.
//! - `GET /metrics` – Ingestion counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::ingestion::{IngestionApi, IngestionError, SearchError, SearchRequest, UploadRequest};
use crate::metrics::MetricsSnapshot;
use crate::qdrant::ScoredChunk;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STATUS_BUFFER: usize = 16;
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: IngestionApi + 'static,
{
    Router::new()
        .route(
            "/documents",
            post(upload_document::<S>)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/search", post(search::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Store an uploaded PDF and stream ingestion progress back as NDJSON.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Response, AppError>
where
    S: IngestionApi + 'static,
{
    let mut file: Option<(String, Bytes)> = None;
    let mut request: Option<UploadRequest> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                file = Some((file_name, bytes));
            }
            Some("metadata") => {
                let text = field.text().await?;
                let parsed = serde_json::from_str(&text).map_err(|error| {
                    AppError::bad_request(format!("invalid metadata JSON: {error}"))
                })?;
                request = Some(parsed);
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| AppError::bad_request("missing `file` field"))?;
    let request = request.ok_or_else(|| AppError::bad_request("missing `metadata` field"))?;

    let document = service.store_upload(&file_name, &bytes, request).await?;
    tracing::info!(
        file = %file_name,
        path = %document.path.display(),
        title = %document.metadata.title,
        "Upload accepted"
    );

    let (tx, mut rx) = mpsc::channel(STATUS_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    tokio::spawn(async move {
        if let Err(error) = service.ingest(document, tx, cancel).await {
            tracing::debug!(error = %error, "Streamed ingestion ended with an error");
        }
    });

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(status) = rx.recv().await {
            match serde_json::to_vec(&status) {
                Ok(mut line) => {
                    line.push(b'\n');
                    yield Ok::<Bytes, Infallible>(Bytes::from(line));
                }
                Err(error) => tracing::warn!(error = %error, "Failed to encode status line"),
            }
        }
    };

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Response body for `POST /search`.
#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ScoredChunk>,
}

/// Retrieve chunks similar to the query, optionally filtered by tags or title.
async fn search<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: IngestionApi,
{
    let results = service.search(request).await?;
    Ok(Json(SearchResponse { results }))
}

/// Return ingestion counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: IngestionApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload_document",
                method: "POST",
                path: "/documents",
                description: "Multipart upload of a PDF (`file`) with `metadata` JSON. Streams NDJSON progress lines until the document is completed or failed.",
                request_example: Some(json!({
                    "metadata": {
                        "title": "Employee handbook",
                        "source": "https://intranet.example.org/handbook.pdf",
                        "tags": ["hr", "policy"]
                    }
                })),
            },
            CommandDescriptor {
                name: "search",
                method: "POST",
                path: "/search",
                description: "Return the stored chunks closest to a query, optionally filtered by tags or title.",
                request_example: Some(json!({
                    "query": "How many days of annual leave?",
                    "limit": 5,
                    "tags": ["hr"]
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": false, "message": self.message })),
        )
            .into_response()
    }
}

impl From<IngestionError> for AppError {
    fn from(inner: IngestionError) -> Self {
        let status = if inner.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %inner, "Upload failed before ingestion started");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: inner.to_string(),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(inner: SearchError) -> Self {
        let status = match inner {
            SearchError::EmptyQuery => StatusCode::BAD_REQUEST,
            SearchError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            SearchError::Qdrant(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: inner.to_string(),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self {
            status: inner.status(),
            message: inner.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::ingestion::storage::validate_extension;
    use crate::ingestion::{
        DocumentMetadata, IngestionApi, IngestionError, IngestionSummary, PreparedDocument,
        ProcessingStatus, SearchError, SearchRequest, UploadOutcome, UploadRequest,
        sanitize::sanitize_metadata,
    };
    use crate::metrics::MetricsSnapshot;
    use crate::qdrant::{ChunkPayload, ScoredChunk};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::{Mutex, mpsc};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const BOUNDARY: &str = "docrelay-test-boundary";

    #[derive(Default)]
    struct StubIngestionService {
        uploads: Mutex<Vec<(String, DocumentMetadata)>>,
        empty_document: bool,
    }

    #[async_trait]
    impl IngestionApi for StubIngestionService {
        async fn store_upload(
            &self,
            file_name: &str,
            _bytes: &[u8],
            request: UploadRequest,
        ) -> Result<PreparedDocument, IngestionError> {
            validate_extension(file_name)?;
            let metadata = sanitize_metadata(request, 1)?;
            self.uploads
                .lock()
                .await
                .push((file_name.to_string(), metadata.clone()));
            Ok(PreparedDocument {
                path: PathBuf::from("uploads/stub.pdf"),
                metadata,
            })
        }

        async fn ingest(
            &self,
            _document: PreparedDocument,
            progress: mpsc::Sender<ProcessingStatus>,
            _cancel: CancellationToken,
        ) -> Result<UploadOutcome, IngestionError> {
            if self.empty_document {
                let _ = progress
                    .send(ProcessingStatus::failed("No text found in document", 2, 2))
                    .await;
                return Err(IngestionError::NoContent {
                    total_pages: 2,
                    skipped_pages: 2,
                });
            }
            let _ = progress
                .send(ProcessingStatus::processing("Processed page 1 of 2", 1, 2))
                .await;
            let _ = progress
                .send(ProcessingStatus::processing("Processed page 2 of 2", 2, 2))
                .await;
            let _ = progress
                .send(ProcessingStatus::completed("Stored 2 chunks", 2))
                .await;
            Ok(UploadOutcome {
                summary: IngestionSummary {
                    total_pages: 2,
                    processed_pages: 2,
                    skipped_pages: 0,
                    chunks_emitted: 2,
                },
                persisted_chunks: 2,
            })
        }

        async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredChunk>, SearchError> {
            if request.query.trim().is_empty() {
                return Err(SearchError::EmptyQuery);
            }
            Ok(vec![ScoredChunk {
                id: "point-1".into(),
                score: 0.9,
                payload: ChunkPayload {
                    content: "Annual leave is twelve days.".into(),
                    title: "Handbook".into(),
                    source: None,
                    tags: request.filter.tags,
                    page_num: 4,
                    total_pages: 10,
                    chunk_hash: "hash".into(),
                    created_at: 1,
                    indexed_at: "2025-01-01T00:00:00Z".into(),
                },
            }])
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_ingested: 3,
                documents_failed: 1,
                chunks_persisted: 42,
                pages_skipped: 2,
            }
        }
    }

    fn multipart_request(file_name: &str, metadata: Option<&str>) -> Request<Body> {
        let mut body = String::new();
        if let Some(metadata) = metadata {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{metadata}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.4 test\r\n--{BOUNDARY}--\r\n"
        ));

        Request::builder()
            .method(Method::POST)
            .uri("/documents")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn commands_catalog_exposes_upload_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let upload = commands
            .iter()
            .find(|cmd| cmd.name == "upload_document")
            .expect("upload command present");

        assert_eq!(upload.method, "POST");
        assert_eq!(upload.path, "/documents");
        assert!(commands.len() >= 3);
    }

    #[tokio::test]
    async fn upload_streams_ndjson_progress() {
        let service = Arc::new(StubIngestionService::default());
        let app = create_router(service.clone(), 1024 * 1024);

        let response = app
            .oneshot(multipart_request(
                "handbook.pdf",
                Some(r#"{"title":"Handbook","tags":["HR"]}"#),
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let lines: Vec<Value> = String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).expect("status line"))
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["status"], "processing");
        assert_eq!(lines[0]["progress"], 0.5);
        assert_eq!(lines[2]["status"], "completed");
        assert_eq!(lines[2]["processed_pages"], 2);

        let uploads = service.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "handbook.pdf");
        assert_eq!(uploads[0].1.tags, vec!["hr".to_string()]);
    }

    #[tokio::test]
    async fn failed_ingestion_still_ends_the_stream() {
        let service = Arc::new(StubIngestionService {
            empty_document: true,
            ..Default::default()
        });
        let app = create_router(service, 1024 * 1024);

        let response = app
            .oneshot(multipart_request(
                "blank.pdf",
                Some(r#"{"title":"Blank"}"#),
            ))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let lines: Vec<Value> = String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).expect("status line"))
            .collect();

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["status"], "failed");
        assert_eq!(lines[0]["message"], "No text found in document");
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_files() {
        let app = create_router(Arc::new(StubIngestionService::default()), 1024 * 1024);
        let response = app
            .oneshot(multipart_request("notes.docx", Some(r#"{"title":"Notes"}"#)))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["status"], false);
        assert!(body["message"].as_str().unwrap().contains("unsupported file type"));
    }

    #[tokio::test]
    async fn upload_requires_metadata() {
        let app = create_router(Arc::new(StubIngestionService::default()), 1024 * 1024);
        let response = app
            .oneshot(multipart_request("handbook.pdf", None))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["message"], "missing `metadata` field");
    }

    #[tokio::test]
    async fn search_returns_hits_and_rejects_blank_queries() {
        let app = create_router(Arc::new(StubIngestionService::default()), 1024);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/search")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "query": "annual leave", "tags": ["hr"] }).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["results"][0]["payload"]["page_num"], 4);
        assert_eq!(body["results"][0]["payload"]["tags"][0], "hr");

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/search")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "query": " " }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_route_reports_counters() {
        let app = create_router(Arc::new(StubIngestionService::default()), 1024);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["chunks_persisted"], 42);
        assert_eq!(body["documents_failed"], 1);
    }
}
