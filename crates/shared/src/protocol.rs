use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{self, RefinementKind, Role, SessionId, UseCaseId, DOCUMENT_UPLOAD_TYPE};

/// A transcript entry exactly as the backend persisted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl RawMessage {
    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn metadata_type(&self) -> Option<&str> {
        domain::metadata_type(self.metadata.as_ref())
    }

    pub fn is_document_upload(&self) -> bool {
        self.metadata_type() == Some(DOCUMENT_UPLOAD_TYPE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub conversation_history: Vec<RawMessage>,
    /// Canonical use cases for the session, still in backend shape.
    #[serde(default)]
    pub generated_use_cases: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTextRequest {
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementRequest {
    pub use_case_id: UseCaseId,
    #[serde(rename = "refinement_type")]
    pub kind: RefinementKind,
}

impl RefinementRequest {
    pub fn new(use_case_id: UseCaseId, kind: RefinementKind) -> Self {
        Self { use_case_id, kind }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Partial use case; only the fields the backend rewrote are guaranteed.
    #[serde(default)]
    pub refined_use_case: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    #[serde(default)]
    pub project_context: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_active: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionListResponse {
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContextUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub session_id: SessionId,
    pub question: String,
}

/// Answer to a free-form question about a session's use cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub answer: String,
    /// Titles of the use cases the answer drew on.
    #[serde(default)]
    pub relevant_use_cases: Vec<String>,
    /// Absent when the session has no use cases yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_use_cases: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantUmlExport {
    #[serde(default)]
    pub plantuml: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}
