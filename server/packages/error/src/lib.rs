//! Error taxonomy shared by the gemini-proxy crates and its OpenAI-style wire body.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequestError,
    ExecutableNotFound,
    CliExecutionError,
    NotFoundError,
    InternalError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequestError => "invalid_request_error",
            Self::ExecutableNotFound => "executable_not_found",
            Self::CliExecutionError => "cli_execution_error",
            Self::NotFoundError => "not_found_error",
            Self::InternalError => "internal_error",
        }
    }
}

/// Inner `error` object of an error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub code: u16,
}

/// Error response body: `{error: {message, type, code}, detail}`.
///
/// `detail` repeats the message for clients that read FastAPI-style errors.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("{message}")]
    InvalidRequest { message: String },
    #[error("gemini cli not usable at {path}: {reason}")]
    ExecutableNotFound { path: String, reason: String },
    /// Every invocation template failed; `details` holds the per-attempt
    /// diagnostics, already truncated by the executor.
    #[error("{details}")]
    AllStrategiesFailed { attempts: usize, details: String },
    #[error("no route for {path}")]
    NotFound { path: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequestError,
            Self::ExecutableNotFound { .. } => ErrorType::ExecutableNotFound,
            Self::AllStrategiesFailed { .. } => ErrorType::CliExecutionError,
            Self::NotFound { .. } => ErrorType::NotFoundError,
            Self::Internal { .. } => ErrorType::InternalError,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::ExecutableNotFound { .. }
            | Self::AllStrategiesFailed { .. }
            | Self::Internal { .. } => 500,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        let message = self.to_string();
        ErrorBody {
            error: ErrorDetail {
                message: message.clone(),
                error_type: self.error_type(),
                code: self.status(),
            },
            detail: Some(message),
        }
    }
}
