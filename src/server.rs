//! HTTP transport: routes, handlers and shared state.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::batch::BatchOrchestrator;
use crate::config::RuleStore;
use crate::rules::RuleSetConfig;
use crate::schema::BatchResult;
use crate::upload::{self, UploadLimits, UploadedFile};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub rules: Arc<RuleStore>,
    pub orchestrator: BatchOrchestrator,
    pub upload_dir: PathBuf,
    pub limits: UploadLimits,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    // Room for a full batch plus multipart framing
    let body_limit = (state.limits.max_files + 1) * state.limits.max_file_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/rules", get(list_rule_sets))
        .route("/rules/:name", get(get_rule_set))
        .route("/upload", post(upload_documents))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available rule sets.
async fn list_rule_sets(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.rules.list())
}

/// Get a specific rule set.
async fn get_rule_set(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RuleSetConfig>, StatusCode> {
    state
        .rules
        .get(&name)
        .map(|set| Json(set.to_config()))
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(serde::Deserialize)]
struct UploadQuery {
    rules: Option<String>,
}

#[derive(serde::Serialize)]
struct UploadResponse {
    fields: BatchResult,
}

/// Accept a batch of images and extract fields from each.
async fn upload_documents(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let rule_set = match query.rules.as_deref() {
        Some(name) => state.rules.get(name).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("Unknown rule set: {}", name))
        })?,
        None => state.rules.default_set(),
    };

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() != Some("files[]") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
        })?;

        // Browsers send an empty part when nothing was selected
        if filename.is_empty() && bytes.is_empty() {
            continue;
        }
        files.push(UploadedFile {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    if let Err(e) = upload::validate(&files, &state.limits) {
        warn!("Rejected upload: {}", e);
        return Err(api_error(StatusCode::BAD_REQUEST, e));
    }

    info!(
        "Received {} files for rule set '{}'",
        files.len(),
        rule_set.name()
    );

    let documents = upload::store(&state.upload_dir, files).await.map_err(|e| {
        error!("Failed to store upload: {:#}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store uploaded files")
    })?;

    // Dropped along with this future if the client disconnects
    let fields = state
        .orchestrator
        .run_batch(documents, rule_set)
        .await
        .map_err(|e| {
            error!("Batch rejected: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        })?;

    Ok(Json(UploadResponse { fields }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::StaticRecognizer;
    use crate::ocr::{encode_png, RecognitionAdapter};
    use crate::preprocess::Preprocessor;
    use crate::rules;
    use image::GrayImage;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;
    use std::time::Duration;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        _uploads: tempfile::TempDir,
    }

    async fn spawn_server(text: &str) -> TestServer {
        let uploads = tempfile::tempdir().unwrap();
        let recognizer = RecognitionAdapter::new(
            Arc::new(StaticRecognizer(text.to_string())),
            Duration::from_secs(5),
        );
        let state = AppState {
            rules: Arc::new(
                RuleStore::from_sets(rules::builtin_rule_sets().unwrap(), "invoice").unwrap(),
            ),
            orchestrator: BatchOrchestrator::new(
                Preprocessor::new(),
                recognizer,
                2,
                Duration::from_secs(5),
            ),
            upload_dir: uploads.path().to_path_buf(),
            limits: UploadLimits {
                max_files: 3,
                max_file_bytes: 1024 * 1024,
            },
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            _uploads: uploads,
        }
    }

    fn image_part(name: &str) -> Part {
        let png = encode_png(&GrayImage::new(4, 4)).unwrap();
        Part::bytes(png).file_name(name.to_string())
    }

    #[tokio::test]
    async fn test_upload_wraps_outcomes_in_fields() {
        let server = spawn_server("Invoice Number INV-42").await;
        let form = Form::new()
            .part("files[]", image_part("scan.png"))
            .text("note", "not a file");

        let resp = server
            .client
            .post(format!("{}/upload", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let body: Value = resp.json().await.unwrap();
        let fields = body["fields"].as_object().unwrap();
        assert_eq!(fields.len(), 1);

        let (id, outcome) = fields.iter().next().unwrap();
        assert!(id.ends_with(".png"));
        assert_ne!(id, "scan.png");
        assert_eq!(outcome, &serde_json::json!({"Invoice Number": "INV-42"}));
    }

    #[tokio::test]
    async fn test_upload_unknown_rule_set() {
        let server = spawn_server("anything").await;
        let form = Form::new().part("files[]", image_part("scan.png"));

        let resp = server
            .client
            .post(format!("{}/upload?rules=payslip", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"error": "Unknown rule set: payslip"}));
    }

    #[tokio::test]
    async fn test_upload_without_image_parts() {
        let server = spawn_server("anything").await;
        let form = Form::new().text("note", "only text");

        let resp = server
            .client
            .post(format!("{}/upload", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"error": "No files selected for upload"}));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_image() {
        let server = spawn_server("anything").await;
        let form = Form::new().part(
            "files[]",
            Part::bytes(b"a,b\n".to_vec()).file_name("report.csv"),
        );

        let resp = server
            .client
            .post(format!("{}/upload", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "report.csv is not an image file");
    }

    #[tokio::test]
    async fn test_rule_set_routes() {
        let server = spawn_server("anything").await;

        let names: Vec<String> = server
            .client
            .get(format!("{}/rules", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(names, vec!["invoice", "purchase_request"]);

        let resp = server
            .client
            .get(format!("{}/rules/purchase_request", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let set: RuleSetConfig = resp.json().await.unwrap();
        assert_eq!(set.name, "purchase_request");

        let resp = server
            .client
            .get(format!("{}/rules/payslip", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let server = spawn_server("anything").await;
        let body = server
            .client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }
}
