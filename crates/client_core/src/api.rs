//! Backend collaborator: the operations the engine needs from the extraction
//! service, and their HTTP binding.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{ExportFormat, SessionId},
    error::BackendError,
    protocol::{
        CreateSessionResponse, ExtractTextRequest, HealthStatus, PlantUmlExport, QueryRequest,
        QueryResponse, RefinementRequest, RefinementResponse, SessionContextUpdate,
        SessionHistory, SessionListResponse, SessionSummary,
    },
};
use tracing::debug;
use url::Url;

use crate::types::{DocumentUpload, SessionExport};

#[async_trait]
pub trait ReqEngineApi: Send + Sync {
    /// Raw extraction response; shapes vary, see [`crate::normalizer`].
    async fn extract_from_text(&self, text: &str, session_id: Option<&SessionId>) -> Result<Value>;
    async fn extract_from_document(
        &self,
        document: &DocumentUpload,
        session_id: Option<&SessionId>,
    ) -> Result<Value>;
    async fn get_session_history(&self, session_id: &SessionId, limit: u32)
        -> Result<SessionHistory>;
    async fn refine_use_case(&self, request: &RefinementRequest) -> Result<RefinementResponse>;
    async fn get_sessions(&self) -> Result<Vec<SessionSummary>>;
    async fn delete_session(&self, session_id: &SessionId) -> Result<()>;
    async fn create_session(&self, context: &SessionContextUpdate) -> Result<SessionId>;
    async fn update_session(&self, context: &SessionContextUpdate) -> Result<()>;
    async fn query_requirements(&self, request: &QueryRequest) -> Result<QueryResponse>;
    async fn export_session(
        &self,
        session_id: &SessionId,
        format: ExportFormat,
    ) -> Result<SessionExport>;
    async fn health(&self) -> Result<HealthStatus>;
}

pub struct HttpReqEngineApi {
    http: Client,
    base_url: String,
}

impl HttpReqEngineApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url.trim())
            .with_context(|| format!("invalid backend url '{base_url}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "backend url '{base_url}' must use http or https, not {}",
                parsed.scheme()
            ));
        }
        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::from_body(status.as_u16(), &body).into())
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    let url = response.url().clone();
    response
        .json()
        .await
        .with_context(|| format!("malformed response body from {url}"))
}

#[async_trait]
impl ReqEngineApi for HttpReqEngineApi {
    async fn extract_from_text(&self, text: &str, session_id: Option<&SessionId>) -> Result<Value> {
        debug!(chars = text.chars().count(), session_id = ?session_id, "api: extract from text");
        let response = self
            .http
            .post(self.url("/parse_use_case_rag/"))
            .json(&ExtractTextRequest {
                raw_text: text.to_string(),
                session_id: session_id.cloned(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    async fn extract_from_document(
        &self,
        document: &DocumentUpload,
        session_id: Option<&SessionId>,
    ) -> Result<Value> {
        debug!(
            filename = %document.filename,
            size_bytes = document.bytes.len(),
            session_id = ?session_id,
            "api: extract from document"
        );
        let mut part = Part::bytes(document.bytes.clone()).file_name(document.filename.clone());
        if let Some(mime_type) = &document.mime_type {
            part = part
                .mime_str(mime_type)
                .with_context(|| format!("invalid mime type '{mime_type}'"))?;
        }
        let mut form = Form::new().part("file", part);
        if let Some(session_id) = session_id {
            form = form.text("session_id", session_id.to_string());
        }
        let response = self
            .http
            .post(self.url("/parse_use_case_document/"))
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_session_history(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<SessionHistory> {
        let response = self
            .http
            .get(self.url(&format!("/session/{session_id}/history")))
            .query(&[("limit", limit)])
            .send()
            .await?;
        read_json(response).await
    }

    async fn refine_use_case(&self, request: &RefinementRequest) -> Result<RefinementResponse> {
        let response = self
            .http
            .post(self.url("/use-case/refine"))
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_sessions(&self) -> Result<Vec<SessionSummary>> {
        let response = self.http.get(self.url("/sessions/")).send().await?;
        let body: SessionListResponse = read_json(response).await?;
        Ok(body.sessions)
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/session/{session_id}")))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn create_session(&self, context: &SessionContextUpdate) -> Result<SessionId> {
        let response = self
            .http
            .post(self.url("/session/create"))
            .json(context)
            .send()
            .await?;
        let body: CreateSessionResponse = read_json(response).await?;
        Ok(body.session_id)
    }

    async fn update_session(&self, context: &SessionContextUpdate) -> Result<()> {
        let response = self
            .http
            .post(self.url("/session/update"))
            .json(context)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn query_requirements(&self, request: &QueryRequest) -> Result<QueryResponse> {
        debug!(session_id = %request.session_id, "api: query requirements");
        let response = self
            .http
            .post(self.url("/query"))
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn export_session(
        &self,
        session_id: &SessionId,
        format: ExportFormat,
    ) -> Result<SessionExport> {
        let response = self
            .http
            .get(self.url(&format!("/session/{session_id}/export/{format}")))
            .send()
            .await?;
        let filename = format.file_name(session_id);
        // PlantUML comes back as JSON; the document formats are file bodies.
        let (bytes, instructions) = match format {
            ExportFormat::PlantUml => {
                let body: PlantUmlExport = read_json(response).await?;
                (body.plantuml.into_bytes(), body.instructions)
            }
            ExportFormat::Markdown | ExportFormat::Docx => {
                let body = check_status(response).await?.bytes().await?;
                (body.to_vec(), None)
            }
        };
        debug!(%session_id, %format, size_bytes = bytes.len(), "api: session exported");
        Ok(SessionExport {
            format,
            filename,
            bytes,
            instructions,
        })
    }

    async fn health(&self) -> Result<HealthStatus> {
        let response = self.http.get(self.url("/health")).send().await?;
        read_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
