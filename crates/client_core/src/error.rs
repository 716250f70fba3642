use shared::{domain::UseCaseId, error::BackendError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefinementError {
    #[error("a refinement for use case {in_flight} is still in progress")]
    InFlight {
        requested: UseCaseId,
        in_flight: UseCaseId,
    },
    #[error("{detail}")]
    Backend { use_case_id: UseCaseId, detail: String },
    #[error("refinement abandoned because the conversation was closed")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("please enter some text")]
    EmptyInput,
    #[error("no session is active")]
    NoActiveSession,
    #[error(transparent)]
    Refinement(#[from] RefinementError),
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// The text worth showing a user for a failed backend call: the backend's own
/// `detail` when it sent one, otherwise the transport error.
pub fn detail_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<BackendError>() {
        Some(backend) => backend.detail.clone(),
        None => format!("{err:#}"),
    }
}
