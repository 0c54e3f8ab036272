use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Upper bound on tool output echoed back to callers.
pub const MAX_OUTPUT_CHARS: usize = 1000;

/// Failure taxonomy shared by every deploy, proxy and build path.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid path '{0}': escapes the workspace root")]
    InvalidPath(String),

    #[error("{tool} is not installed")]
    ToolchainUnavailable { tool: String, remediation: String },

    #[error("{message}")]
    BuildFailed { message: String, output: String },

    #[error("{message}")]
    LaunchFailed { message: String, output: String },

    #[error("{what} timed out after {}s", after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("{0} not found")]
    NotFound(String),

    #[error("project '{0}' is still starting, try again shortly")]
    BackendUnreachable(String),

    #[error("backend request failed: {0}")]
    BackendFailed(String),

    #[error("{message}")]
    Deploy { message: String, output: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

impl DeployError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        DeployError::InvalidInput(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DeployError::InvalidInput(_) | DeployError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            DeployError::ToolchainUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DeployError::BuildFailed { .. } => StatusCode::BAD_REQUEST,
            DeployError::LaunchFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DeployError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DeployError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployError::BackendUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DeployError::BackendFailed(_) => StatusCode::BAD_GATEWAY,
            DeployError::Deploy { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DeployError::Io(_) | DeployError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Raw tool output attached to the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            DeployError::BuildFailed { output, .. }
            | DeployError::LaunchFailed { output, .. }
            | DeployError::Deploy { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

/// Keep the tail of `text`, where compilers put the error that matters.
pub fn truncate_output(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - MAX_OUTPUT_CHARS).collect()
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
}

impl From<&DeployError> for ErrorBody {
    fn from(err: &DeployError) -> Self {
        let setup = match err {
            DeployError::ToolchainUnavailable { remediation, .. } => Some(remediation.clone()),
            _ => None,
        };
        ErrorBody {
            success: false,
            error: err.to_string(),
            build_error: err
                .output()
                .filter(|o| !o.trim().is_empty())
                .map(truncate_output),
            setup,
        }
    }
}

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(DeployError::invalid("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DeployError::NotFound("project 'a'".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DeployError::BackendUnreachable("a".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DeployError::Timeout {
                what: "build".into(),
                after: Duration::from_secs(600)
            }
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            DeployError::ToolchainUnavailable {
                tool: "go".into(),
                remediation: "apt install golang".into()
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn truncate_keeps_tail() {
        let long = format!("{}END", "x".repeat(5000));
        let out = truncate_output(&long);
        assert_eq!(out.chars().count(), MAX_OUTPUT_CHARS);
        assert!(out.ends_with("END"));
        assert_eq!(truncate_output("short"), "short");
    }

    #[test]
    fn error_body_carries_build_output_and_setup() {
        let err = DeployError::BuildFailed {
            message: "go build failed".into(),
            output: "main.go:3: syntax error".into(),
        };
        let body = ErrorBody::from(&err);
        assert!(!body.success);
        assert_eq!(body.error, "go build failed");
        assert_eq!(body.build_error.as_deref(), Some("main.go:3: syntax error"));
        assert!(body.setup.is_none());

        let err = DeployError::ToolchainUnavailable {
            tool: "cargo".into(),
            remediation: "curl https://sh.rustup.rs -sSf | sh".into(),
        };
        let body = ErrorBody::from(&err);
        assert_eq!(body.error, "cargo is not installed");
        assert!(body.setup.unwrap().contains("rustup"));
    }
}
