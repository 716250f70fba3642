use std::{fmt, str::FromStr};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Accepts a non-empty JSON string or an integer; the backend hands out
            /// both depending on which table the record came from.
            pub fn from_json(value: &Value) -> Option<Self> {
                match value {
                    Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
                    Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let value = Value::deserialize(deserializer)?;
                Self::from_json(&value).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "expected a string or integer identifier, got {value}"
                    ))
                })
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(UseCaseId);

pub const DEFAULT_USE_CASE_STATUS: &str = "stored";
pub const DEFAULT_USE_CASE_TITLE: &str = "Untitled";
pub const DOCUMENT_UPLOAD_TYPE: &str = "document_upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefinementKind {
    #[default]
    MoreMainFlows,
    MoreSubFlows,
    MoreAlternateFlows,
    MorePreconditions,
    MoreStakeholders,
}

impl RefinementKind {
    pub const ALL: [RefinementKind; 5] = [
        RefinementKind::MoreMainFlows,
        RefinementKind::MoreSubFlows,
        RefinementKind::MoreAlternateFlows,
        RefinementKind::MorePreconditions,
        RefinementKind::MoreStakeholders,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RefinementKind::MoreMainFlows => "more_main_flows",
            RefinementKind::MoreSubFlows => "more_sub_flows",
            RefinementKind::MoreAlternateFlows => "more_alternate_flows",
            RefinementKind::MorePreconditions => "more_preconditions",
            RefinementKind::MoreStakeholders => "more_stakeholders",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RefinementKind::MoreMainFlows => "Refine Main Flows",
            RefinementKind::MoreSubFlows => "Refine Sub Flows",
            RefinementKind::MoreAlternateFlows => "Refine Alternate Flows",
            RefinementKind::MorePreconditions => "Refine Preconditions",
            RefinementKind::MoreStakeholders => "Refine Stakeholders",
        }
    }
}

impl fmt::Display for RefinementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown refinement kind '{0}'")]
pub struct UnknownRefinementKind(pub String);

impl FromStr for RefinementKind {
    type Err = UnknownRefinementKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        RefinementKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| UnknownRefinementKind(s.to_string()))
    }
}

/// Session export flavours offered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Markdown,
    Docx,
    #[serde(rename = "plantuml")]
    PlantUml,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [
        ExportFormat::Markdown,
        ExportFormat::Docx,
        ExportFormat::PlantUml,
    ];

    /// Path segment under `/session/{id}/export/`.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Docx => "docx",
            ExportFormat::PlantUml => "plantuml",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Docx => "docx",
            ExportFormat::PlantUml => "puml",
        }
    }

    pub fn file_name(self, session_id: &SessionId) -> String {
        format!("use_cases_{session_id}.{}", self.extension())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown export format '{0}' (expected markdown, docx or plantuml)")]
pub struct UnknownExportFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnknownExportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        match wanted.as_str() {
            "md" => return Ok(ExportFormat::Markdown),
            "puml" => return Ok(ExportFormat::PlantUml),
            _ => {}
        }
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| UnknownExportFormat(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Excellent,
    Good,
    NeedsImprovement,
}

impl QualityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            QualityTier::Excellent
        } else if score >= 60.0 {
            QualityTier::Good
        } else {
            QualityTier::NeedsImprovement
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UseCaseId>,
    pub title: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub main_flow: Vec<String>,
    #[serde(default)]
    pub sub_flows: Vec<String>,
    #[serde(default)]
    pub alternate_flows: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// Set only by the in-memory refinement patch so the view can highlight it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refined: bool,
}

fn default_status() -> String {
    DEFAULT_USE_CASE_STATUS.to_string()
}

impl UseCase {
    pub fn untitled() -> Self {
        Self {
            id: None,
            title: DEFAULT_USE_CASE_TITLE.to_string(),
            status: default_status(),
            preconditions: Vec::new(),
            main_flow: Vec::new(),
            sub_flows: Vec::new(),
            alternate_flows: Vec::new(),
            outcomes: Vec::new(),
            stakeholders: Vec::new(),
            quality_score: None,
            refined: false,
        }
    }

    pub fn is_refinable(&self) -> bool {
        self.id.is_some()
    }

    pub fn quality_tier(&self) -> Option<QualityTier> {
        self.quality_score.map(QualityTier::from_score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_case_refs: Option<Vec<UseCase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<Vec<Value>>,
    #[serde(default)]
    pub timestamp: String,
    /// Client-side handle for optimistic entries; never leaves the process.
    #[serde(skip)]
    pub local_ref: Option<Uuid>,
}

impl Message {
    fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: None,
            use_case_refs: None,
            validation_results: None,
            timestamp: Utc::now().to_rfc3339(),
            local_ref: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::now(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::now(Role::Assistant, content)
    }

    pub fn document_upload(filename: &str, size_bytes: u64) -> Self {
        let mut message = Self::now(Role::User, "");
        message.metadata = Some(json!({
            "type": DOCUMENT_UPLOAD_TYPE,
            "filename": filename,
            "size": size_bytes,
        }));
        message
    }

    pub fn with_local_ref(mut self, local_ref: Uuid) -> Self {
        self.local_ref = Some(local_ref);
        self
    }

    pub fn with_results(mut self, results: Vec<UseCase>, validation_results: Vec<Value>) -> Self {
        self.use_case_refs = Some(results);
        self.validation_results = Some(validation_results);
        self
    }

    pub fn metadata_type(&self) -> Option<&str> {
        metadata_type(self.metadata.as_ref())
    }

    pub fn is_document_upload(&self) -> bool {
        self.metadata_type() == Some(DOCUMENT_UPLOAD_TYPE)
    }
}

pub fn metadata_type(metadata: Option<&Value>) -> Option<&str> {
    metadata?.get("type")?.as_str()
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
