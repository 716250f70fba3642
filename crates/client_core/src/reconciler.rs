//! Builds the transcript that should be rendered for a session: persisted
//! order, canonical use cases substituted for the stale copies embedded in
//! message metadata, and the ingestion echo of document uploads filtered out.

use std::collections::HashMap;

use serde_json::Value;
use shared::{
    domain::{Message, Role, UseCase, UseCaseId},
    protocol::RawMessage,
};

use crate::normalizer::normalize_use_case;

/// Parsed document text is persisted as a user message right after the upload
/// entry; ordinary prompts are shorter than this. Measured in UTF-16 code
/// units, the unit the web client uses for string length.
pub const INGESTION_ECHO_MIN_LEN: usize = 200;

pub fn reconcile(persisted: &[RawMessage], fresh: &[UseCase]) -> Vec<Message> {
    let lookup = fresh_lookup(fresh);
    let mut rendered = Vec::with_capacity(persisted.len());
    let mut previous: Option<&RawMessage> = None;

    for message in persisted {
        if !is_ingestion_echo(message, previous) {
            rendered.push(render_message(message, &lookup));
        }
        previous = Some(message);
    }

    rendered
}

/// True when `current` is the raw document text the backend stored as a
/// follow-up to the upload entry `previous`.
pub fn is_ingestion_echo(current: &RawMessage, previous: Option<&RawMessage>) -> bool {
    current.role == Role::User
        && current.content().encode_utf16().count() > INGESTION_ECHO_MIN_LEN
        && previous.is_some_and(RawMessage::is_document_upload)
        && !current.is_document_upload()
}

fn fresh_lookup(fresh: &[UseCase]) -> HashMap<&UseCaseId, &UseCase> {
    fresh
        .iter()
        .filter_map(|use_case| use_case.id.as_ref().map(|id| (id, use_case)))
        .collect()
}

fn render_message(message: &RawMessage, lookup: &HashMap<&UseCaseId, &UseCase>) -> Message {
    let metadata = message.metadata.as_ref();

    let use_case_refs = metadata
        .and_then(|metadata| metadata.get("use_cases"))
        .and_then(Value::as_array)
        .map(|embedded| {
            embedded
                .iter()
                .map(|entry| {
                    let last_known = normalize_use_case(entry);
                    match last_known.id.as_ref().and_then(|id| lookup.get(id)) {
                        Some(fresh) => (*fresh).clone(),
                        None => last_known,
                    }
                })
                .collect()
        });

    let validation_results = metadata
        .and_then(|metadata| metadata.get("validation_results"))
        .and_then(Value::as_array)
        .cloned();

    Message {
        role: message.role,
        content: message.content().to_string(),
        metadata: message.metadata.clone(),
        use_case_refs,
        validation_results,
        timestamp: message.timestamp.clone().unwrap_or_default(),
        local_ref: None,
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
