use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{Request, StatusCode, Uri};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};

use gemini_proxy_error::{ErrorBody, ErrorDetail, ErrorType, ProxyError};

use crate::audit::{audit_middleware, AuditLog};
use crate::completion::{
    AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChunkChoice, ChunkDelta, CompletionChoice, CompletionResult, CompletionService, ModelInfo,
    ModelListResponse, Usage,
};
use crate::prompt::{ChatMessage, PromptInput, Role};
use crate::stream::{segment, StreamEvent, STREAM_CHUNK_CHARS};

const STREAM_DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct AppState {
    completions: CompletionService,
    audit_log: Option<AuditLog>,
}

impl AppState {
    pub fn new(completions: CompletionService) -> Self {
        Self {
            completions,
            audit_log: None,
        }
    }

    pub fn with_audit_log(mut self, audit_log: AuditLog) -> Self {
        self.audit_log = Some(audit_log);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let audit_log = state.audit_log.clone();
    let shared = Arc::new(state);

    let mut router = Router::new()
        .route("/health", get(get_health))
        .route("/v1/models", get(list_models))
        .route("/models", get(list_models))
        .route("/v1/chat/completions", post(create_chat_completion))
        .route("/chat/completions", post(create_chat_completion))
        .fallback(not_found)
        .with_state(shared)
        .layer(CatchPanicLayer::custom(handle_panic));

    if let Some(audit_log) = audit_log {
        router = router.layer(axum::middleware::from_fn_with_state(
            audit_log,
            audit_middleware,
        ));
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %req.method(),
                uri = %req.uri()
            )
        })
        .on_request(|_req: &Request<_>, span: &Span| {
            tracing::info!(parent: span, "request");
        })
        .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
            tracing::info!(
                parent: span,
                status = %res.status(),
                latency_ms = latency.as_millis()
            );
        });
    router.layer(trace_layer)
}

#[derive(OpenApi)]
#[openapi(
    paths(get_health, list_models, create_chat_completion),
    components(
        schemas(
            HealthResponse,
            ModelInfo,
            ModelListResponse,
            ChatCompletionRequest,
            ChatMessage,
            Role,
            PromptInput,
            ChatCompletionResponse,
            CompletionChoice,
            AssistantMessage,
            Usage,
            ChatCompletionChunk,
            ChunkChoice,
            ChunkDelta,
            ErrorBody,
            ErrorDetail,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "models", description = "Model listing"),
        (name = "chat", description = "Chat completions")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:7777")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::Proxy(err) => err.to_error_body(),
        };
        let status =
            StatusCode::from_u16(body.error.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Unix seconds.
    pub timestamp: i64,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "meta"
)]
/// Health Check
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/models",
    responses((status = 200, description = "Supported models", body = ModelListResponse)),
    tag = "models"
)]
/// List Models
///
/// Also served at `/models`.
async fn list_models() -> Json<ModelListResponse> {
    Json(ModelListResponse::supported())
}

#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion, or a `text/event-stream` of `ChatCompletionChunk` when `stream` is true", body = ChatCompletionResponse),
        (status = 400, description = "Malformed or empty request", body = ErrorBody),
        (status = 500, description = "Gemini CLI missing or every invocation failed", body = ErrorBody)
    ),
    tag = "chat"
)]
/// Create Chat Completion
///
/// Runs the Gemini CLI to completion, then answers with one JSON object or
/// replays the text as server-sent events. Also served at `/chat/completions`.
async fn create_chat_completion(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|err| {
        ProxyError::invalid_request(format!("Failed to read request body: {}", err.body_text()))
    })?;
    let request = ChatCompletionRequest::from_slice(&body)?;
    let request_id = uuid::Uuid::new_v4().simple().to_string();

    let result = state.completions.complete(&request, &request_id).await?;

    if !request.wants_stream() {
        return Ok(Json(result.to_response()).into_response());
    }

    let content = result.content.clone();
    let events = segment(content, STREAM_CHUNK_CHARS)
        .flat_map(move |event| stream::iter(to_sse_events(&result, event)));
    Ok(Sse::new(events).into_response())
}

fn to_sse_events(result: &CompletionResult, event: StreamEvent) -> Vec<Result<Event, Infallible>> {
    match event {
        StreamEvent::Delta { content, .. } => vec![Ok(chunk_event(&result.chunk(content)))],
        StreamEvent::Done => vec![
            Ok(chunk_event(&result.stop_chunk())),
            Ok(Event::default().data(STREAM_DONE_MARKER)),
        ],
    }
}

fn chunk_event(chunk: &ChatCompletionChunk) -> Event {
    Event::default()
        .json_data(chunk)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::from(ProxyError::NotFound {
        path: uri.path().to_string(),
    })
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "request handler panicked".to_string()
    };
    tracing::error!(panic = %message, "request handler panicked");
    ApiError::from(ProxyError::internal(message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_routes() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/v1/models"));
        assert!(paths.contains_key("/v1/chat/completions"));
        assert!(doc["components"]["schemas"]["ErrorBody"].is_object());
    }

    #[test]
    fn panics_render_as_internal_errors() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
