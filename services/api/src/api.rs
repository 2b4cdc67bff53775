use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::ingest::{IngestOutcome, Ingestor, UploadDescriptor};
use crate::metadata_store::{FileRecord, FileSearchQuery, MetadataStore};
use crate::object_store::ObjectStore;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub objects: Arc<ObjectStore>,
    pub catalog: Arc<MetadataStore>,
    pub ingestor: Arc<Ingestor>,
    pub presigned_url_expiry: Duration,
    pub max_archive_entry_bytes: u64,
}

/// Query parameters for catalog search
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Exact file ID match
    pub file_id: Option<Uuid>,
    /// Partial project id match (case-insensitive)
    pub research_project_id: Option<String>,
    /// Partial author match (case-insensitive)
    pub author: Option<String>,
    /// Partial file type match, e.g. 'PDF', 'MAT' (case-insensitive)
    pub file_type: Option<String>,
    /// Partial experiment type match (case-insensitive)
    pub experiment_type: Option<String>,
    /// Keyword searched within custom_tags
    pub tags_contain: Option<String>,
    /// Files conducted ON or AFTER this date (YYYY-MM-DD)
    pub date_after: Option<NaiveDate>,
    /// Files conducted ON or BEFORE this date (YYYY-MM-DD)
    pub date_before: Option<NaiveDate>,
    /// Maximum results
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

const MAX_SEARCH_LIMIT: i64 = 500;

/// Presigned URL response
#[derive(Debug, Serialize)]
pub struct PresignedUrlResponse {
    /// Time-limited direct object store URL
    pub url: String,
    /// URL expiration time
    pub expires_at: DateTime<Utc>,
    /// Catalog record for the file
    pub file: FileRecord,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/status", get(status))
        .route("/ready", get(readiness_check))
        .route("/docs", get(api_docs))
        .route("/uploadfile/", post(upload_file))
        .route("/upload_folder/", post(upload_folder))
        .route("/search", get(search_files))
        .route("/download/:file_id", get(download_file))
        .route("/download/:file_id/url", get(download_url))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Interactive API documentation page
const API_DOCS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Research File Catalog API</title>
  <style>
    body { font-family: sans-serif; max-width: 56rem; margin: 2rem auto; padding: 0 1rem; }
    code { background: #f0f0f0; padding: 0.1rem 0.3rem; border-radius: 3px; }
    .method { font-weight: bold; color: #2a6f2a; }
    td, th { text-align: left; padding: 0.2rem 0.8rem 0.2rem 0; vertical-align: top; }
  </style>
</head>
<body>
  <h1>Research File Catalog API</h1>
  <p>Ingestion, search, and retrieval of research data files. Uploads are
  stored in the object store; descriptive metadata is indexed for search.</p>

  <h2><span class="method">POST</span> /uploadfile/</h2>
  <p>Multipart form upload of a single file.</p>
  <table>
    <tr><th>Part</th><th>Content</th></tr>
    <tr><td><code>data_file</code></td><td>the file to store</td></tr>
    <tr><td><code>metadata_file</code></td><td>YAML descriptor with optional
      <code>research_project_id</code>, <code>author</code>,
      <code>experiment_type</code>, <code>date_conducted</code> (YYYY-MM-DD),
      <code>custom_tags</code></td></tr>
  </table>
  <p>Returns the generated <code>file_id</code> and final object name.</p>

  <h2><span class="method">POST</span> /upload_folder/</h2>
  <p>Multipart form upload of a whole folder packaged as a ZIP archive
  (<code>zip_file</code> + <code>metadata_file</code>). Every archive entry is
  catalogued separately; returns <code>{"upload_results": [...]}</code>.</p>

  <h2><span class="method">GET</span> /search</h2>
  <p>Query parameters (all optional, combined with AND):
  <code>file_id</code>, <code>research_project_id</code>, <code>author</code>,
  <code>file_type</code>, <code>experiment_type</code>,
  <code>tags_contain</code>, <code>date_after</code>, <code>date_before</code>,
  <code>limit</code>, <code>offset</code>. Text filters match partially and
  case-insensitively; dates are inclusive bounds.</p>

  <h2><span class="method">GET</span> /download/{file_id}</h2>
  <p>Streams the stored file back as an attachment.</p>

  <h2><span class="method">GET</span> /download/{file_id}/url</h2>
  <p>Returns a time-limited presigned URL for direct object store access.</p>

  <h2><span class="method">GET</span> /status, <span class="method">GET</span> /ready</h2>
  <p>Liveness and readiness probes.</p>
</body>
</html>
"#;

async fn api_docs() -> Html<&'static str> {
    Html(API_DOCS_HTML)
}

/// Liveness endpoint
async fn status() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "API SERVICE RUNNING"
    }))
}

/// Readiness endpoint: verifies metadata database connectivity
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.catalog.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// One part of a multipart upload, buffered in memory
struct UploadPart {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

/// Pull the named file parts out of a multipart request
async fn collect_parts(
    mut multipart: Multipart,
    names: &[&'static str],
) -> Result<Vec<Option<UploadPart>>, ApiError> {
    let mut parts: Vec<Option<UploadPart>> = names.iter().map(|_| None).collect();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadUpload(e.to_string()))?
    {
        let Some(idx) = field
            .name()
            .and_then(|name| names.iter().position(|n| *n == name))
        else {
            continue;
        };

        let file_name = field.file_name().unwrap_or(names[idx]).to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadUpload(e.to_string()))?;

        parts[idx] = Some(UploadPart {
            file_name,
            content_type,
            data,
        });
    }

    Ok(parts)
}

/// Handle a single file upload with its YAML metadata descriptor
#[instrument(skip(state, multipart))]
async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestOutcome>, ApiError> {
    let mut parts = collect_parts(multipart, &["data_file", "metadata_file"]).await?;

    let metadata = parts[1].take().ok_or(ApiError::MissingField("metadata_file"))?;
    let data_file = parts[0].take().ok_or(ApiError::MissingField("data_file"))?;

    let descriptor = UploadDescriptor::parse(&metadata.data)?;

    let outcome = state
        .ingestor
        .store_file(
            &data_file.file_name,
            data_file.content_type.as_deref(),
            data_file.data,
            &descriptor,
            "",
        )
        .await?;

    Ok(Json(outcome))
}

/// Handle a folder upload packaged as a single ZIP archive
#[instrument(skip(state, multipart))]
async fn upload_folder(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut parts = collect_parts(multipart, &["zip_file", "metadata_file"]).await?;

    let metadata = parts[1].take().ok_or(ApiError::MissingField("metadata_file"))?;
    let zip_file = parts[0].take().ok_or(ApiError::MissingField("zip_file"))?;

    let descriptor = UploadDescriptor::parse(&metadata.data)?;

    let results = state
        .ingestor
        .store_archive(
            &zip_file.file_name,
            zip_file.data,
            &descriptor,
            state.max_archive_entry_bytes,
        )
        .await?;

    Ok(Json(serde_json::json!({ "upload_results": results })))
}

/// Search the catalog with filter criteria
#[instrument(skip(state))]
async fn search_files(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<FileRecord>>, ApiError> {
    let query = to_search_query(params);
    let records = state.catalog.search_files(&query).await?;
    Ok(Json(records))
}

/// Map search parameters to a catalog query, dropping empty-string filters
fn to_search_query(params: SearchParams) -> FileSearchQuery {
    FileSearchQuery {
        file_id: params.file_id,
        project_id: non_empty(params.research_project_id),
        author: non_empty(params.author),
        file_type: non_empty(params.file_type),
        experiment_type: non_empty(params.experiment_type),
        tags_contain: non_empty(params.tags_contain),
        date_after: params.date_after,
        date_before: params.date_before,
        limit: Some(params.limit.clamp(1, MAX_SEARCH_LIMIT)),
        offset: Some(params.offset.max(0)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Stream a stored file back to the client, proxying the object store
#[instrument(skip(state))]
async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let location = state
        .catalog
        .get_storage_location(file_id)
        .await?
        .ok_or(ApiError::FileNotFound(file_id))?;

    let object = state
        .objects
        .get_object(&location.minio_bucket_name, &location.minio_object_path)
        .await
        .map_err(|e| ApiError::Storage(e.to_string()))?
        .ok_or(ApiError::ObjectMissing)?;

    info!(
        file_id = %file_id,
        object_path = %location.minio_object_path,
        "Proxying download"
    );

    let content_length = object.content_length();
    let stream = ReaderStream::new(object.body.into_async_read());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &location.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            attachment_disposition(&location.file_name),
        );

    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    let response = builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;

    metrics::counter!("catalog.downloads.served").increment(1);

    Ok(response)
}

/// Build a Content-Disposition value from a stored file name.
///
/// The name is client-supplied, so quotes, backslashes, and control
/// characters must not reach the quoted-string header value.
fn attachment_disposition(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c => c,
        })
        .collect();

    format!("attachment; filename=\"{}\"", sanitized)
}

/// Generate a time-limited presigned URL for direct object store access
#[instrument(skip(state))]
async fn download_url(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<PresignedUrlResponse>, ApiError> {
    let file = state
        .catalog
        .get_file(file_id)
        .await?
        .ok_or(ApiError::FileNotFound(file_id))?;

    let (url, expires_at) = state
        .objects
        .presign_get(
            &file.minio_bucket_name,
            &file.minio_object_path,
            state.presigned_url_expiry,
        )
        .await
        .map_err(|e| ApiError::Storage(e.to_string()))?;

    Ok(Json(PresignedUrlResponse {
        url,
        expires_at,
        file,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_defaults() -> SearchParams {
        SearchParams {
            file_id: None,
            research_project_id: None,
            author: None,
            file_type: None,
            experiment_type: None,
            tags_contain: None,
            date_after: None,
            date_before: None,
            limit: default_limit(),
            offset: 0,
        }
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(default_limit(), 100);
    }

    #[test]
    fn test_to_search_query_drops_empty_filters() {
        let params = SearchParams {
            research_project_id: Some(String::new()),
            author: Some("curie".to_string()),
            ..params_with_defaults()
        };

        let query = to_search_query(params);
        assert!(query.project_id.is_none());
        assert_eq!(query.author.as_deref(), Some("curie"));
        assert_eq!(query.limit, Some(100));
        assert_eq!(query.offset, Some(0));
    }

    #[test]
    fn test_to_search_query_clamps_limit_and_offset() {
        let params = SearchParams {
            limit: 10_000,
            offset: -5,
            ..params_with_defaults()
        };

        let query = to_search_query(params);
        assert_eq!(query.limit, Some(MAX_SEARCH_LIMIT));
        assert_eq!(query.offset, Some(0));
    }

    #[test]
    fn test_api_docs_page_lists_endpoints() {
        assert!(API_DOCS_HTML.contains("/uploadfile/"));
        assert!(API_DOCS_HTML.contains("/upload_folder/"));
        assert!(API_DOCS_HTML.contains("/search"));
        assert!(API_DOCS_HTML.contains("/download/{file_id}"));
    }

    #[test]
    fn test_attachment_disposition_plain_name() {
        assert_eq!(
            attachment_disposition("run01.mat"),
            "attachment; filename=\"run01.mat\""
        );
    }

    #[test]
    fn test_attachment_disposition_strips_hostile_names() {
        assert_eq!(
            attachment_disposition("run\"01\\.mat"),
            "attachment; filename=\"run_01_.mat\""
        );
        assert_eq!(
            attachment_disposition("run\r\n01.mat"),
            "attachment; filename=\"run01.mat\""
        );
    }

    #[test]
    fn test_search_params_deserialize_from_query_string() {
        let params: SearchParams = serde_urlencoded::from_str(
            "author=curie&file_type=MAT&date_after=2024-01-01&limit=20",
        )
        .unwrap();

        assert_eq!(params.author.as_deref(), Some("curie"));
        assert_eq!(params.limit, 20);
        assert_eq!(params.offset, 0);
        assert_eq!(
            params.date_after,
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
    }
}
