//! Canonicalises extraction responses.
//!
//! The backend has shipped several response layouts over time (`results`
//! vs. `generated_use_cases`, `main_flow` vs. nested `main_flows`). Everything
//! here is total: malformed input degrades to defaults, nothing panics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::domain::{SessionId, UseCase, UseCaseId, DEFAULT_USE_CASE_STATUS, DEFAULT_USE_CASE_TITLE};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub session_id: Option<SessionId>,
    pub message: Option<String>,
    pub extracted_count: u64,
    pub processing_time_seconds: Option<f64>,
    pub validation_results: Vec<Value>,
    pub results: Vec<UseCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    ResultsArray,
    GeneratedUseCases,
    Neither,
}

impl ResponseShape {
    pub fn classify(input: &Value) -> Self {
        if input.get("results").is_some_and(Value::is_array) {
            ResponseShape::ResultsArray
        } else if input.get("generated_use_cases").is_some_and(Value::is_array) {
            ResponseShape::GeneratedUseCases
        } else {
            ResponseShape::Neither
        }
    }

    fn entries(self, input: &Value) -> &[Value] {
        let key = match self {
            ResponseShape::ResultsArray => "results",
            ResponseShape::GeneratedUseCases => "generated_use_cases",
            ResponseShape::Neither => return &[],
        };
        input
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

pub fn normalize_extraction(input: &Value) -> ExtractionOutcome {
    let validation_results = array_field(input, "validation_results").to_vec();
    let results: Vec<UseCase> = ResponseShape::classify(input)
        .entries(input)
        .iter()
        .map(|entry| normalize_use_case_with(entry, &validation_results))
        .collect();

    // The count is unsigned: negative values fall back to the result count
    // and fractions are truncated toward zero.
    let extracted_count = input
        .get("extracted_count")
        .and_then(Value::as_f64)
        .filter(|count| count.is_finite() && *count >= 0.0)
        .map(|count| count.trunc() as u64)
        .unwrap_or(results.len() as u64);

    ExtractionOutcome {
        session_id: input.get("session_id").and_then(SessionId::from_json),
        message: input
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        extracted_count,
        processing_time_seconds: input
            .get("processing_time_seconds")
            .and_then(Value::as_f64),
        validation_results,
        results,
    }
}

pub fn normalize_use_case(entry: &Value) -> UseCase {
    normalize_use_case_with(entry, &[])
}

/// Normalises a whole list of backend use cases, e.g. `generated_use_cases`
/// from a history response.
pub fn normalize_use_cases(entries: &[Value]) -> Vec<UseCase> {
    entries.iter().map(normalize_use_case).collect()
}

fn normalize_use_case_with(entry: &Value, validation_results: &[Value]) -> UseCase {
    let title = entry
        .get("title")
        .and_then(Value::as_str)
        .filter(|title| !title.is_empty())
        .unwrap_or(DEFAULT_USE_CASE_TITLE)
        .to_string();

    let quality_score = entry
        .get("quality_score")
        .and_then(Value::as_f64)
        .or_else(|| validation_score_for(&title, validation_results));

    UseCase {
        id: use_case_id(entry),
        status: entry
            .get("status")
            .and_then(Value::as_str)
            .filter(|status| !status.is_empty())
            .unwrap_or(DEFAULT_USE_CASE_STATUS)
            .to_string(),
        preconditions: string_list(entry.get("preconditions")),
        main_flow: main_flow(entry),
        sub_flows: string_list(entry.get("sub_flows")),
        alternate_flows: string_list(entry.get("alternate_flows")),
        outcomes: string_list(entry.get("outcomes")),
        stakeholders: string_list(entry.get("stakeholders")),
        quality_score,
        refined: false,
        title,
    }
}

/// Overlays the fields present in a refinement payload onto `base`. Fields the
/// payload omits (or sends in an unusable shape) keep their current value.
pub fn apply_refinement(base: &UseCase, refined: &Value) -> UseCase {
    let mut patched = base.clone();
    if let Some(title) = refined
        .get("title")
        .and_then(Value::as_str)
        .filter(|title| !title.is_empty())
    {
        patched.title = title.to_string();
    }
    if let Some(status) = refined.get("status").and_then(Value::as_str) {
        patched.status = status.to_string();
    }
    if refined.get("main_flow").is_some_and(Value::is_array)
        || refined.get("main_flows").is_some_and(Value::is_array)
    {
        patched.main_flow = main_flow(refined);
    }
    overlay_list(&mut patched.preconditions, refined.get("preconditions"));
    overlay_list(&mut patched.sub_flows, refined.get("sub_flows"));
    overlay_list(&mut patched.alternate_flows, refined.get("alternate_flows"));
    overlay_list(&mut patched.outcomes, refined.get("outcomes"));
    overlay_list(&mut patched.stakeholders, refined.get("stakeholders"));
    if let Some(score) = refined.get("quality_score").and_then(Value::as_f64) {
        patched.quality_score = Some(score);
    }
    patched.refined = true;
    patched
}

fn use_case_id(entry: &Value) -> Option<UseCaseId> {
    entry
        .get("id")
        .and_then(UseCaseId::from_json)
        .or_else(|| entry.get("use_case_id").and_then(UseCaseId::from_json))
}

fn main_flow(entry: &Value) -> Vec<String> {
    if let Some(Value::Array(steps)) = entry.get("main_flow") {
        return steps.iter().filter_map(list_item).collect();
    }
    if let Some(Value::Array(flows)) = entry.get("main_flows") {
        return flows
            .iter()
            .flat_map(|flow| match flow {
                Value::Array(steps) => steps.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .filter_map(list_item)
            .collect();
    }
    Vec::new()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(list_item).collect(),
        _ => Vec::new(),
    }
}

fn overlay_list(target: &mut Vec<String>, value: Option<&Value>) {
    if value.is_some_and(Value::is_array) {
        *target = string_list(value);
    }
}

fn list_item(item: &Value) -> Option<String> {
    match item {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn array_field<'a>(input: &'a Value, key: &str) -> &'a [Value] {
    input
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn validation_score_for(title: &str, validation_results: &[Value]) -> Option<f64> {
    validation_results
        .iter()
        .find(|result| result.get("title").and_then(Value::as_str) == Some(title))
        .and_then(|result| result.get("quality_score"))
        .and_then(Value::as_f64)
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
