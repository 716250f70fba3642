use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{domain::ExportFormat, protocol::RefinementRequest};

use crate::normalizer::ExtractionOutcome;

pub const EXTRACTION_FAILURE_TEXT: &str =
    "⚠ Could not process request. Make sure backend is running.";
pub const DOCUMENT_FAILURE_TEXT: &str = "⚠ Could not process file. Make sure backend is running.";
pub const HISTORY_FAILURE_TEXT: &str =
    "⚠ Could not load conversation history. Make sure backend is running.";

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(800);

/// What happens to the optimistic user entry when the call it triggered fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    RetainAndAnnotate,
    RollBack,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "retain" | "retain_and_annotate" => Ok(FailurePolicy::RetainAndAnnotate),
            "rollback" | "roll_back" => Ok(FailurePolicy::RollBack),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub history_limit: u32,
    /// Wait between a successful refinement and the reload that reads it back.
    pub settle_delay: Duration,
    pub text_failure_policy: FailurePolicy,
    pub document_failure_policy: FailurePolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            text_failure_policy: FailurePolicy::default(),
            document_failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A downloaded session export, ready to be written to `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExport {
    pub format: ExportFormat,
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Rendering hints the backend sends with PlantUML source.
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Extracted(ExtractionOutcome),
    Failed { reason: String },
    /// The session changed or the engine shut down before the response landed.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Applied { messages: usize },
    NoSession,
    Failed { reason: String },
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementApplied {
    Reloaded(ReloadOutcome),
    Patched,
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementOutcome {
    pub request: RefinementRequest,
    pub refined_use_case: Value,
    pub applied: RefinementApplied,
}
