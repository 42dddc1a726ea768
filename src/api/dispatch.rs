use crate::error::DispatchError;
use crate::pipeline::SchedulePipeline;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, FailedToBufferBody},
        DefaultBodyLimit, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::error;

/// Request headers browsers may send to the trigger endpoint.
pub const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SchedulePipeline,
    pub max_body_bytes: usize,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create API router with the schedule dispatch endpoint.
///
/// Every response, errors included, carries the CORS headers.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/", post(send_schedules).options(preflight))
        .route(
            "/send-schedules-to-device",
            post(send_schedules).options(preflight),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .with_state(Arc::new(state))
}

/// OPTIONS - browser pre-flight, never reaches the pipeline
async fn preflight() -> &'static str {
    "ok"
}

/// POST - resolve and publish the schedules of the device named by the change event
///
/// The dispatch runs on its own task: a caller that hangs up or times out
/// does not cancel a publish in flight or skip closing its bus session.
async fn send_schedules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, AppError> {
    let body = match body {
        Ok(body) => body,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            return Err(AppError::PayloadTooLarge)
        }
        Err(e) => return Err(AppError::BodyUnreadable(e.body_text())),
    };

    let caller_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let pipeline = state.pipeline.clone();
    let dispatch =
        tokio::spawn(async move { pipeline.dispatch_json(&body, caller_auth).await });

    match dispatch.await {
        Ok(result) => result?,
        Err(e) => return Err(AppError::Aborted(e.to_string())),
    };

    Ok(Json(json!({})))
}

/// Application error types.
///
/// Every failure maps to 400; callers tell kinds apart by the message.
/// Dispatch failures are logged by the pipeline, the rest here.
enum AppError {
    Dispatch(DispatchError),
    PayloadTooLarge,
    BodyUnreadable(String),
    Aborted(String),
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = match self {
            AppError::Dispatch(e) => e.to_string(),
            AppError::PayloadTooLarge => {
                error!(kind = "body", "Rejected oversized trigger body");
                "payload too large".to_string()
            }
            AppError::BodyUnreadable(msg) => {
                error!(kind = "body", error = %msg, "Failed to read trigger body");
                format!("invalid body: {}", msg)
            }
            AppError::Aborted(msg) => {
                error!(kind = "aborted", error = %msg, "Schedule dispatch task failed");
                format!("dispatch aborted: {}", msg)
            }
        };
        (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
    }
}
