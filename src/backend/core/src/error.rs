//! Error handling for TaskHub.
//!
//! Provides a stable, machine-readable [`ErrorCode`] set, the
//! [`TaskHubError`] type carried through every fallible API, the numeric
//! business codes used in the `{code, message, data}` response envelope,
//! and the HTTP status mapping applied when an error reaches the axum
//! layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// A specialized Result type for TaskHub operations.
pub type Result<T> = std::result::Result<T, TaskHubError>;

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Ingress / validation
    InvalidJson,
    InvalidParam,
    MissingRequiredField,

    // DAG
    CycleDetected,
    MissingDep,
    DagFailed,

    // Execution
    StrategyMissing,
    NestingDepthExceeded,
    TaskNotFound,
    TaskAlreadyFinished,

    // Templates
    TemplateNotFound,
    TemplateInvalid,

    // Cron
    CronSpecInvalid,
    CronJobNotFound,

    // Workers
    WorkerUnavailable,
    WorkerNotFound,

    // Auth
    Unauthorized,
    BadCredentials,

    // Storage
    DatabaseError,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Business code placed in the response envelope. `0` is reserved for
    /// success.
    pub const fn business_code(&self) -> i32 {
        match self {
            Self::InvalidJson => 1002,
            Self::InvalidParam => 1005,
            Self::MissingRequiredField => 1001,
            Self::CycleDetected => 1101,
            Self::MissingDep => 1102,
            Self::DagFailed => 1103,
            Self::StrategyMissing => 1201,
            Self::NestingDepthExceeded => 1202,
            Self::TaskNotFound => 1003,
            Self::TaskAlreadyFinished => 1004,
            Self::TemplateNotFound => 1301,
            Self::TemplateInvalid => 1302,
            Self::CronSpecInvalid => 1401,
            Self::CronJobNotFound => 1402,
            Self::WorkerUnavailable => 1501,
            Self::WorkerNotFound => 1502,
            Self::Unauthorized => 401,
            Self::BadCredentials => 1004,
            Self::DatabaseError => 2000,
            Self::Internal => 9000,
        }
    }

    /// HTTP status for the failure class: 400 for client mistakes, 401 for
    /// unauth, 404 for absent, 500 for internal.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidJson
            | Self::InvalidParam
            | Self::MissingRequiredField
            | Self::CycleDetected
            | Self::MissingDep
            | Self::TemplateInvalid
            | Self::CronSpecInvalid
            | Self::TaskAlreadyFinished => StatusCode::BAD_REQUEST,

            Self::Unauthorized | Self::BadCredentials => StatusCode::UNAUTHORIZED,

            Self::TaskNotFound
            | Self::TemplateNotFound
            | Self::CronJobNotFound
            | Self::WorkerNotFound => StatusCode::NOT_FOUND,

            Self::StrategyMissing
            | Self::NestingDepthExceeded
            | Self::DagFailed
            | Self::WorkerUnavailable
            | Self::DatabaseError
            | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The error type carried through every fallible TaskHub operation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaskHubError {
    code: ErrorCode,
    message: String,
    /// Detail kept out of user-facing responses.
    internal: Option<String>,
}

impl TaskHubError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), internal: None }
    }

    pub fn with_internal(code: ErrorCode, message: impl Into<String>, internal: impl Into<String>) -> Self {
        Self { code, message: message.into(), internal: Some(internal.into()) }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParam, message)
    }

    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        let code = match kind {
            "template" => ErrorCode::TemplateNotFound,
            "cron" => ErrorCode::CronJobNotFound,
            "worker" => ErrorCode::WorkerNotFound,
            _ => ErrorCode::TaskNotFound,
        };
        Self::new(code, format!("{kind} not found: {id}"))
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<sqlx::Error> for TaskHubError {
    fn from(e: sqlx::Error) -> Self {
        TaskHubError::with_internal(ErrorCode::DatabaseError, "database operation failed", e.to_string())
    }
}

impl From<serde_json::Error> for TaskHubError {
    fn from(e: serde_json::Error) -> Self {
        TaskHubError::new(ErrorCode::InvalidJson, e.to_string())
    }
}

/// Response envelope: `{code, message, data}`. `code=0` means success; a
/// non-zero business code does not imply a non-200 HTTP status (handlers
/// may answer soft failures with 200 plus a business code).
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub code: i32,
    pub message: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self { code: 0, message: "ok".into(), data }
    }

    pub fn err(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: serde_json::Value::Null }
    }
}

impl IntoResponse for TaskHubError {
    fn into_response(self) -> Response {
        if let Some(internal) = &self.internal {
            warn!(code = ?self.code, internal = %internal, "request failed");
        }
        let body = Envelope::err(self.code.business_code(), self.message);
        (self.code.http_status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorCode::InvalidJson.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::TemplateNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Internal.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_credentials_business_code() {
        // The login handler promises code 1004 on bad credentials.
        assert_eq!(ErrorCode::BadCredentials.business_code(), 1004);
    }

    #[test]
    fn envelope_shape() {
        let ok = Envelope::ok(serde_json::json!({"x": 1}));
        assert_eq!(ok.code, 0);
        let err = Envelope::err(1002, "Invalid JSON");
        assert!(err.data.is_null());
    }
}
