#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

use gemini_proxy::audit::AuditLog;
use gemini_proxy::config::ProxyConfig;
use gemini_proxy::router::{build_router, AppState};

pub struct TestApp {
    pub app: Router,
    pub audit_path: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    /// App whose configured CLI path does not exist.
    pub fn without_cli() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = ProxyConfig::new(dir.path().join("gemini"));
        Self::from_config(config, dir, false)
    }

    /// App backed by a shell script standing in for the CLI.
    #[cfg(unix)]
    pub fn with_script(body: &str) -> Self {
        Self::with_script_and_audit(body, false)
    }

    #[cfg(unix)]
    pub fn with_script_and_audit(body: &str, audit: bool) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let script = write_script(dir.path(), body);
        let mut config = ProxyConfig::new(script);
        config.attempt_timeout = Duration::from_secs(10);
        Self::from_config(config, dir, audit)
    }

    fn from_config(mut config: ProxyConfig, dir: TempDir, audit: bool) -> Self {
        let audit_path = dir.path().join("proxy.log");
        if audit {
            config.audit_log = Some(audit_path.clone());
        }
        let mut state = AppState::new(config.completion_service());
        if let Some(path) = &config.audit_log {
            state = state.with_audit_log(AuditLog::new(path));
        }
        let app = build_router(state).layer(config.cors.build_layer().expect("cors layer"));
        Self {
            app,
            audit_path,
            _dir: dir,
        }
    }

    pub fn audit_entries(&self) -> Vec<Value> {
        std::fs::read_to_string(&self.audit_path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("audit line is json"))
            .collect()
    }
}

#[cfg(unix)]
pub fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("gemini");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub cli");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod stub cli");
    path
}

pub async fn send_raw(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<&str>,
) -> (StatusCode, HeaderMap, String) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request handled");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn send_json(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body = body.map(|body| body.to_string());
    let (status, _, text) = send_raw(app, method, path, body.as_deref()).await;
    let value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    (status, value)
}

/// Payloads of every `data:` line of an event stream, in order.
pub fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
                .map(str::to_string)
        })
        .collect()
}
