//! Append-only JSON-lines audit log of HTTP requests.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use gemini_proxy_error::ProxyError;

use crate::executor::truncate_chars;

/// Request bodies larger than this are rejected.
pub const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

const MAX_LOGGED_RESPONSE_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix seconds with fractional part.
    pub ts: f64,
    pub at: String,
    pub id: String,
    pub method: String,
    pub path: String,
    pub request: String,
    pub status: u16,
    pub response: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Arc<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. Failures are logged and swallowed.
    pub async fn record(&self, entry: AuditEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode audit entry");
                return;
            }
        };
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || append_line(&path, &line)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to write audit log");
            }
            Err(err) => {
                tracing::warn!(error = %err, "audit log writer task failed");
            }
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

/// Buffers the request body and JSON responses so both can be recorded.
/// Event streams pass through untouched with an empty `response`.
pub async fn audit_middleware(State(log): State<AuditLog>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();

    let (request_text, response) = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let request = Request::from_parts(parts, Body::from(bytes));
            (text, next.run(request).await)
        }
        Err(err) => {
            let err = ProxyError::invalid_request(format!("Failed to read request body: {err}"));
            let response = (StatusCode::BAD_REQUEST, Json(err.to_error_body())).into_response();
            (String::new(), response)
        }
    };

    let status = response.status().as_u16();
    let (response, response_text) = if is_json(response.headers()) {
        let (parts, body) = response.into_parts();
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let text = truncate_chars(&text, MAX_LOGGED_RESPONSE_CHARS).to_string();
                (Response::from_parts(parts, Body::from(bytes)), text)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to buffer response for audit log");
                let err = ProxyError::internal(err.to_string());
                let response =
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(err.to_error_body())).into_response();
                (response, String::new())
            }
        }
    } else {
        (response, String::new())
    };

    let now = OffsetDateTime::now_utc();
    log.record(AuditEntry {
        ts: now.unix_timestamp_nanos() as f64 / 1e9,
        at: now.format(&Rfc3339).unwrap_or_default(),
        id: uuid::Uuid::new_v4().simple().to_string(),
        method,
        path,
        request: request_text,
        status,
        response: response_text,
        duration_ms: started.elapsed().as_millis() as u64,
    })
    .await;

    response
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> AuditEntry {
        AuditEntry {
            ts: 1.5,
            at: "1970-01-01T00:00:01.5Z".to_string(),
            id: id.to_string(),
            method: "GET".to_string(),
            path: "/health".to_string(),
            request: String::new(),
            status: 200,
            response: "{}".to_string(),
            duration_ms: 3,
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("proxy.log"));

        log.record(entry("first")).await;
        log.record(entry("second")).await;

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let entries: Vec<AuditEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries, vec![entry("first"), entry("second")]);
    }

    #[tokio::test]
    async fn write_failures_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("missing").join("proxy.log"));
        log.record(entry("lost")).await;
        assert!(!log.path().exists());
    }
}
