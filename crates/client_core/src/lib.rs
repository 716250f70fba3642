use std::{future::Future, iter, sync::Arc};

use serde_json::Value;
use shared::{
    domain::{ExportFormat, Message, SessionId, UseCaseId},
    protocol::{
        HealthStatus, QueryRequest, QueryResponse, RefinementRequest, SessionContextUpdate,
        SessionSummary,
    },
};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod api;
pub mod error;
pub mod normalizer;
pub mod reconciler;
pub mod refinement;
pub mod store;
pub mod types;

pub use api::{HttpReqEngineApi, ReqEngineApi};
pub use error::{detail_message, EngineError, RefinementError};
pub use normalizer::{normalize_extraction, ExtractionOutcome, ResponseShape};
pub use reconciler::{is_ingestion_echo, reconcile};
pub use refinement::{ActiveRefinement, RefinementCoordinator, RefinementPhase};
pub use store::{SessionSnapshot, SessionStore, SessionTicket};
pub use types::{
    DocumentUpload, EngineSettings, ExchangeOutcome, FailurePolicy, RefinementApplied,
    RefinementOutcome, ReloadOutcome, SessionExport, DOCUMENT_FAILURE_TEXT,
    EXTRACTION_FAILURE_TEXT, HISTORY_FAILURE_TEXT,
};

use crate::{normalizer::normalize_use_cases, refinement::patch_transcript};

/// Which input surface started an exchange; each has its own failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Text,
    Document,
}

pub struct ConversationEngine {
    api: Arc<dyn ReqEngineApi>,
    store: SessionStore,
    refinements: RefinementCoordinator,
    settings: EngineSettings,
    reload_lock: Mutex<()>,
    liveness: CancellationToken,
    last_extraction: watch::Sender<Option<ExtractionOutcome>>,
}

impl ConversationEngine {
    pub fn new(api: Arc<dyn ReqEngineApi>, settings: EngineSettings) -> Self {
        Self::with_store(api, SessionStore::new(), settings)
    }

    pub fn with_store(
        api: Arc<dyn ReqEngineApi>,
        store: SessionStore,
        settings: EngineSettings,
    ) -> Self {
        let (last_extraction, _) = watch::channel(None);
        Self {
            api,
            store,
            refinements: RefinementCoordinator::new(),
            settings,
            reload_lock: Mutex::new(()),
            liveness: CancellationToken::new(),
            last_extraction,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.store.subscribe()
    }

    pub fn last_extraction(&self) -> Option<ExtractionOutcome> {
        self.last_extraction.borrow().clone()
    }

    pub fn refinement_phase(&self, use_case_id: &UseCaseId) -> RefinementPhase {
        self.refinements.phase(use_case_id)
    }

    pub fn subscribe_refinements(&self) -> watch::Receiver<Option<ActiveRefinement>> {
        self.refinements.subscribe()
    }

    /// Token that is cancelled when the owning surface goes away.
    pub fn liveness(&self) -> CancellationToken {
        self.liveness.clone()
    }

    pub fn is_live(&self) -> bool {
        !self.liveness.is_cancelled()
    }

    /// Stops any pending result from being applied to the store.
    pub fn shutdown(&self) {
        if !self.liveness.is_cancelled() {
            info!("engine: shutting down, in-flight results will be dropped");
            self.liveness.cancel();
        }
    }

    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.liveness.cancelled() => None,
            output = fut => Some(output),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<ExchangeOutcome, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let local_ref = Uuid::new_v4();
        let ticket = self.store.ticket();
        self.store
            .append_message(Message::user(text).with_local_ref(local_ref));

        let response = self
            .guarded(self.api.extract_from_text(text, ticket.session_id.as_ref()))
            .await;
        Ok(self.finish_exchange(ticket, local_ref, Surface::Text, response, |outcome| {
            format!(
                "✅ Extracted {} use cases in {}s",
                outcome.extracted_count,
                format_seconds(outcome.processing_time_seconds)
            )
        }))
    }

    pub async fn upload_document(&self, document: DocumentUpload) -> ExchangeOutcome {
        let local_ref = Uuid::new_v4();
        let ticket = self.store.ticket();
        self.store.append_message(
            Message::document_upload(&document.filename, document.bytes.len() as u64)
                .with_local_ref(local_ref),
        );

        let response = self
            .guarded(
                self.api
                    .extract_from_document(&document, ticket.session_id.as_ref()),
            )
            .await;
        self.finish_exchange(ticket, local_ref, Surface::Document, response, |outcome| {
            format!(
                "✅ Extracted {} use cases from {}",
                outcome.extracted_count, document.filename
            )
        })
    }

    fn finish_exchange<S>(
        &self,
        ticket: SessionTicket,
        local_ref: Uuid,
        surface: Surface,
        response: Option<anyhow::Result<Value>>,
        summary: S,
    ) -> ExchangeOutcome
    where
        S: FnOnce(&ExtractionOutcome) -> String,
    {
        let Some(response) = response else {
            debug!(?surface, "engine: dropping extraction response after shutdown");
            return ExchangeOutcome::Discarded;
        };
        if !self.is_live() || !self.store.is_current(&ticket) {
            debug!(?surface, ?ticket, "engine: dropping extraction response for stale session");
            return ExchangeOutcome::Discarded;
        }

        match response {
            Ok(raw) => {
                let outcome = normalize_extraction(&raw);
                let ticket = match (&ticket.session_id, &outcome.session_id) {
                    (None, Some(created)) => {
                        match self
                            .store
                            .set_current_session_for(&ticket, Some(created.clone()))
                        {
                            Some(adopted) => {
                                info!(session_id = %created, "engine: adopted new session");
                                adopted
                            }
                            None => return ExchangeOutcome::Discarded,
                        }
                    }
                    _ => ticket,
                };

                let reply = Message::assistant(summary(&outcome))
                    .with_results(outcome.results.clone(), outcome.validation_results.clone());
                if !self.store.append_message_for(&ticket, reply) {
                    return ExchangeOutcome::Discarded;
                }
                info!(
                    ?surface,
                    extracted = outcome.extracted_count,
                    session_id = ?outcome.session_id,
                    "engine: extraction applied"
                );
                self.last_extraction.send_replace(Some(outcome.clone()));
                ExchangeOutcome::Extracted(outcome)
            }
            Err(err) => {
                let reason = detail_message(&err);
                warn!(?surface, error = %reason, "engine: extraction failed");
                let (policy, failure_text) = match surface {
                    Surface::Text => (self.settings.text_failure_policy, EXTRACTION_FAILURE_TEXT),
                    Surface::Document => {
                        (self.settings.document_failure_policy, DOCUMENT_FAILURE_TEXT)
                    }
                };
                let failure = Message::assistant(failure_text);
                let applied = match policy {
                    FailurePolicy::RetainAndAnnotate => {
                        self.store.append_message_for(&ticket, failure)
                    }
                    FailurePolicy::RollBack => {
                        self.store.replace_messages_with(&ticket, |messages| {
                            messages
                                .iter()
                                .filter(|message| message.local_ref != Some(local_ref))
                                .cloned()
                                .chain(iter::once(failure))
                                .collect()
                        })
                    }
                };
                if applied {
                    ExchangeOutcome::Failed { reason }
                } else {
                    ExchangeOutcome::Discarded
                }
            }
        }
    }

    /// Switches to `session_id` and loads its reconciled transcript.
    pub async fn open_session(&self, session_id: SessionId) -> ReloadOutcome {
        self.store.clear_session();
        self.store.set_current_session(Some(session_id));
        self.reload_history().await
    }

    /// Re-fetches the active session and replaces the transcript with the
    /// reconciled result. Reloads never overlap.
    pub async fn reload_history(&self) -> ReloadOutcome {
        let _serialized = self.reload_lock.lock().await;
        let ticket = self.store.ticket();
        let Some(session_id) = ticket.session_id.clone() else {
            return ReloadOutcome::NoSession;
        };

        let Some(response) = self
            .guarded(
                self.api
                    .get_session_history(&session_id, self.settings.history_limit),
            )
            .await
        else {
            return ReloadOutcome::Discarded;
        };

        match response {
            Ok(history) => {
                let fresh = normalize_use_cases(&history.generated_use_cases);
                let transcript = reconcile(&history.conversation_history, &fresh);
                let messages = transcript.len();
                if self.is_live() && self.store.replace_messages_for(&ticket, transcript) {
                    info!(
                        session_id = %session_id,
                        persisted = history.conversation_history.len(),
                        rendered = messages,
                        use_cases = fresh.len(),
                        "engine: history reconciled"
                    );
                    ReloadOutcome::Applied { messages }
                } else {
                    debug!(session_id = %session_id, "engine: dropping stale history response");
                    ReloadOutcome::Discarded
                }
            }
            Err(err) => {
                let reason = detail_message(&err);
                warn!(session_id = %session_id, error = %reason, "engine: history load failed");
                if self.is_live()
                    && self
                        .store
                        .append_message_for(&ticket, Message::assistant(HISTORY_FAILURE_TEXT))
                {
                    ReloadOutcome::Failed { reason }
                } else {
                    ReloadOutcome::Discarded
                }
            }
        }
    }

    pub async fn refine_use_case(
        &self,
        request: RefinementRequest,
    ) -> Result<RefinementOutcome, RefinementError> {
        let ticket = self.refinements.begin(request.clone())?;
        info!(
            use_case_id = %request.use_case_id,
            kind = %request.kind,
            "refinement: requesting"
        );

        let response = match self.guarded(self.api.refine_use_case(&request)).await {
            None => return Err(RefinementError::Cancelled),
            Some(Err(err)) => {
                let detail = detail_message(&err);
                warn!(use_case_id = %request.use_case_id, error = %detail, "refinement: failed");
                return Err(RefinementError::Backend {
                    use_case_id: request.use_case_id,
                    detail,
                });
            }
            Some(Ok(response)) => response,
        };

        ticket.advance();
        debug!(
            use_case_id = %request.use_case_id,
            delay_ms = self.settings.settle_delay.as_millis() as u64,
            "refinement: settling"
        );
        if self
            .guarded(tokio::time::sleep(self.settings.settle_delay))
            .await
            .is_none()
        {
            return Err(RefinementError::Cancelled);
        }

        ticket.advance();
        let session = self.store.ticket();
        let applied = if session.session_id.is_some() {
            RefinementApplied::Reloaded(self.reload_history().await)
        } else if self.is_live()
            && self.store.replace_messages_with(&session, |messages| {
                patch_transcript(messages, &request.use_case_id, &response.refined_use_case)
            })
        {
            RefinementApplied::Patched
        } else {
            RefinementApplied::Discarded
        };
        drop(ticket);

        info!(use_case_id = %request.use_case_id, ?applied, "refinement: complete");
        Ok(RefinementOutcome {
            request,
            refined_use_case: response.refined_use_case,
            applied,
        })
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, EngineError> {
        Ok(self.api.get_sessions().await?)
    }

    /// Deletes a session server-side; the store is cleared when it was active.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), EngineError> {
        self.api.delete_session(session_id).await?;
        if self.is_live() && self.store.current_session_id().as_ref() == Some(session_id) {
            info!(session_id = %session_id, "engine: active session deleted");
            self.store.clear_session();
        }
        Ok(())
    }

    /// Creates a session up front with project context, instead of waiting for
    /// the first extraction to create one implicitly.
    pub async fn start_session(
        &self,
        project_context: Option<String>,
        domain: Option<String>,
    ) -> Result<SessionId, EngineError> {
        let session_id = self
            .api
            .create_session(&SessionContextUpdate {
                session_id: None,
                project_context: project_context.clone(),
                domain: domain.clone(),
            })
            .await?;
        if self.is_live() {
            self.store.clear_session();
            self.store.set_current_session(Some(session_id.clone()));
            self.store.set_session_context(project_context, domain);
        }
        Ok(session_id)
    }

    pub async fn update_session_context(
        &self,
        project_context: Option<String>,
        domain: Option<String>,
    ) -> Result<(), EngineError> {
        let Some(session_id) = self.store.current_session_id() else {
            return Err(EngineError::NoActiveSession);
        };
        self.api
            .update_session(&SessionContextUpdate {
                session_id: Some(session_id.clone()),
                project_context: project_context.clone(),
                domain: domain.clone(),
            })
            .await?;
        if self.is_live() && self.store.current_session_id() == Some(session_id) {
            self.store.set_session_context(project_context, domain);
        }
        Ok(())
    }

    /// Asks the backend a question about the active session's use cases. The
    /// answer is returned, not added to the transcript.
    pub async fn query(&self, question: &str) -> Result<QueryResponse, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        let Some(session_id) = self.store.current_session_id() else {
            return Err(EngineError::NoActiveSession);
        };
        let response = self
            .api
            .query_requirements(&QueryRequest {
                session_id: session_id.clone(),
                question: question.to_string(),
            })
            .await?;
        info!(
            session_id = %session_id,
            relevant = response.relevant_use_cases.len(),
            "engine: requirements query answered"
        );
        Ok(response)
    }

    pub async fn export_session(&self, format: ExportFormat) -> Result<SessionExport, EngineError> {
        let Some(session_id) = self.store.current_session_id() else {
            return Err(EngineError::NoActiveSession);
        };
        Ok(self.api.export_session(&session_id, format).await?)
    }

    pub async fn health(&self) -> Result<HealthStatus, EngineError> {
        Ok(self.api.health().await?)
    }
}

impl Drop for ConversationEngine {
    fn drop(&mut self) {
        self.liveness.cancel();
    }
}

fn format_seconds(seconds: Option<f64>) -> String {
    match seconds {
        Some(seconds) if seconds.is_finite() => format!("{seconds}"),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
