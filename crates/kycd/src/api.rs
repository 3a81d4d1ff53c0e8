use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kyc_core::VerificationResult;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing form field: {0}")]
    MissingField(&'static str),
    #[error("form field is empty: {0}")]
    EmptyField(&'static str),
    #[error("{0}")]
    NotMultipart(#[from] MultipartRejection),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) | ApiError::EmptyField(_) => StatusCode::BAD_REQUEST,
            ApiError::NotMultipart(_) => StatusCode::BAD_REQUEST,
            // 413 when the body limit is hit mid-stream, 400 otherwise
            ApiError::Multipart(e) => e.status(),
            ApiError::Engine(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "verify request failed");
        } else {
            tracing::debug!(error = %self, "verify request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    liveness_available: bool,
    version: &'static str,
}

pub fn router(engine: EngineHandle, config: &Config) -> Router {
    Router::new()
        .route("/kyc/verify", post(verify))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let info = state.engine.info();
    Json(HealthResponse {
        status: "ok",
        model: info.model.clone(),
        liveness_available: info.liveness_available,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn verify(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VerificationResult>, ApiError> {
    let request_id = Uuid::new_v4();
    run_verify(state, multipart)
        .instrument(tracing::info_span!("verify", %request_id))
        .await
}

async fn run_verify(
    state: AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VerificationResult>, ApiError> {
    let (document, selfie) = read_images(multipart?).await?;
    tracing::debug!(
        document_bytes = document.len(),
        selfie_bytes = selfie.len(),
        "verify request received"
    );

    let result = state.engine.verify(document.to_vec(), selfie.to_vec()).await?;
    tracing::info!(
        success = result.success,
        similarity = ?result.similarity,
        liveness_score = ?result.liveness_score,
        reason = %result.reason,
        "verification complete"
    );
    Ok(Json(result))
}

/// Pull the `document` and `selfie` file fields out of the form. Other fields are ignored.
async fn read_images(mut multipart: Multipart) -> Result<(Bytes, Bytes), ApiError> {
    let mut document = None;
    let mut selfie = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("document") => document = Some(field.bytes().await?),
            Some("selfie") => selfie = Some(field.bytes().await?),
            _ => {}
        }
    }

    Ok((require(document, "document")?, require(selfie, "selfie")?))
}

fn require(field: Option<Bytes>, name: &'static str) -> Result<Bytes, ApiError> {
    match field {
        None => Err(ApiError::MissingField(name)),
        Some(bytes) if bytes.is_empty() => Err(ApiError::EmptyField(name)),
        Some(bytes) => Ok(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use kyc_core::{
        BoundingBox, Embedding, FaceCandidate, FaceLocator, LivenessChecker, LocateError,
        PixelGrid, Policy, Verifier,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::engine::spawn_engine;

    const BOUNDARY: &str = "kyc-test-boundary";

    /// One 150×150 face on any image whose top-left pixel is non-black,
    /// all sharing the same embedding.
    struct StubLocator {
        delay: Duration,
    }

    impl FaceLocator for StubLocator {
        fn locate(&mut self, grid: &PixelGrid) -> Result<Vec<FaceCandidate>, LocateError> {
            std::thread::sleep(self.delay);
            if grid.rgb().get_pixel(0, 0)[0] == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![FaceCandidate {
                bbox: BoundingBox::new(10.0, 10.0, 160.0, 160.0),
                confidence: 0.97,
                landmarks: [(0.0, 0.0); 5],
                embedding: Embedding {
                    values: vec![0.6, 0.8],
                    model_version: None,
                },
            }])
        }

        fn describe(&self) -> String {
            "stub-det + stub-rec".to_string()
        }
    }

    fn app_with(delay: Duration, config: Config) -> Router {
        let verifier = Verifier::new(
            StubLocator { delay },
            LivenessChecker::unavailable(),
            Policy::default(),
        );
        let engine = spawn_engine(verifier, Duration::from_secs(config.verify_timeout_secs));
        router(engine, &config)
    }

    fn app() -> Router {
        app_with(Duration::ZERO, Config::default())
    }

    fn png(red: u8) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        image::RgbImage::from_pixel(4, 4, image::Rgb([red, 0, 0]))
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn multipart_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, data) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn verify_request(fields: &[(&str, &[u8])]) -> Request<Body> {
        let body = multipart_body(fields);
        Request::builder()
            .method("POST")
            .uri("/kyc/verify")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_models() {
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model"], "stub-det + stub-rec");
        assert_eq!(json["liveness_available"], false);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn verify_returns_result() {
        let (doc, selfie) = (png(200), png(180));
        let request = verify_request(&[
            ("document", doc.as_slice()),
            ("selfie", selfie.as_slice()),
        ]);
        let (status, json) = send(app(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["similarity"], 1.0);
        assert_eq!(json["liveness_score"], 1.0);
        assert_eq!(json["face_found_on_document"], true);
        assert_eq!(json["face_found_on_selfie"], true);
        assert_eq!(json["reason"], "KYC verified");
    }

    #[tokio::test]
    async fn domain_rejection_is_still_200() {
        let (doc, selfie) = (png(200), png(0));
        let request = verify_request(&[
            ("document", doc.as_slice()),
            ("selfie", selfie.as_slice()),
        ]);
        let (status, json) = send(app(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert_eq!(json["reason"], "no face detected on selfie");
        assert_eq!(json["similarity"], Value::Null);
    }

    #[tokio::test]
    async fn undecodable_upload_is_a_rejection() {
        let selfie = png(200);
        let request = verify_request(&[
            ("document", &b"%PDF-1.4"[..]),
            ("selfie", selfie.as_slice()),
        ]);
        let (status, json) = send(app(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert!(json["reason"].as_str().unwrap().starts_with("Document: "));
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let doc = png(200);
        let (status, json) = send(app(), verify_request(&[("document", doc.as_slice())])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "missing form field: selfie");
    }

    #[tokio::test]
    async fn empty_field_is_bad_request() {
        let selfie = png(200);
        let request = verify_request(&[("document", &b""[..]), ("selfie", selfie.as_slice())]);
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "form field is empty: document");
    }

    #[tokio::test]
    async fn non_multipart_body_is_bad_request() {
        let request = Request::post("/kyc/verify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = Config {
            max_upload_bytes: 64,
            ..Config::default()
        };
        let (doc, selfie) = (png(200), png(200));
        let request = verify_request(&[
            ("document", doc.as_slice()),
            ("selfie", selfie.as_slice()),
        ]);
        let response = app_with(Duration::ZERO, config)
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn engine_timeout_is_service_unavailable() {
        let config = Config {
            verify_timeout_secs: 0,
            ..Config::default()
        };
        let (doc, selfie) = (png(200), png(200));
        let request = verify_request(&[
            ("document", doc.as_slice()),
            ("selfie", selfie.as_slice()),
        ]);
        let (status, json) = send(app_with(Duration::from_millis(200), config), request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/kyc/verify")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }
}
