use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            400 | 422 => ErrorCode::Validation,
            500..=599 => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Body of a non-2xx backend response. FastAPI puts a string in `detail` for
/// raised errors and a list of field errors for request validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct BackendError {
    pub status: u16,
    pub code: ErrorCode,
    pub detail: String,
}

impl BackendError {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            code: ErrorCode::from_status(status),
            detail: detail.into(),
        }
    }

    pub fn from_body(status: u16, body: &str) -> Self {
        let detail = match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                detail: Value::String(detail),
            }) if !detail.trim().is_empty() => detail,
            Ok(ErrorBody { detail }) if !detail.is_null() => detail.to_string(),
            _ if !body.trim().is_empty() => body.trim().to_string(),
            _ => format!("request failed with status {status}"),
        };
        Self::new(status, detail)
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
