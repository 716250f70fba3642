use super::*;
use serde_json::json;

fn raw(role: Role, content: &str, metadata: Option<Value>) -> RawMessage {
    RawMessage {
        role,
        content: Some(content.to_string()),
        metadata,
        timestamp: Some("2024-05-01T10:00:00Z".to_string()),
    }
}

fn upload_entry() -> RawMessage {
    RawMessage {
        role: Role::User,
        content: None,
        metadata: Some(json!({ "type": "document_upload", "filename": "spec.txt" })),
        timestamp: None,
    }
}

fn fresh(id: &str, title: &str) -> UseCase {
    UseCase {
        id: Some(UseCaseId::new(id)),
        title: title.to_string(),
        ..UseCase::untitled()
    }
}

#[test]
fn drops_long_user_text_right_after_an_upload() {
    let persisted = vec![
        upload_entry(),
        raw(Role::User, &"x".repeat(201), None),
        raw(Role::Assistant, "✅ Extracted 1 use cases from spec.txt", None),
    ];

    let rendered = reconcile(&persisted, &[]);

    assert_eq!(rendered.len(), 2);
    assert!(rendered[0].is_document_upload());
    assert_eq!(rendered[1].role, Role::Assistant);
}

#[test]
fn keeps_user_text_at_the_length_threshold() {
    let persisted = vec![upload_entry(), raw(Role::User, &"x".repeat(200), None)];

    let rendered = reconcile(&persisted, &[]);

    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[1].content.encode_utf16().count(), 200);
}

#[test]
fn threshold_counts_utf16_code_units() {
    let accented = vec![upload_entry(), raw(Role::User, &"é".repeat(150), None)];
    assert_eq!(reconcile(&accented, &[]).len(), 2);

    let emoji = raw(Role::User, &"😀".repeat(150), None);
    assert_eq!(emoji.content().chars().count(), 150);
    assert!(is_ingestion_echo(&emoji, Some(&upload_entry())));
    assert_eq!(reconcile(&[upload_entry(), emoji], &[]).len(), 1);

    let at_threshold = raw(Role::User, &"😀".repeat(100), None);
    assert!(!is_ingestion_echo(&at_threshold, Some(&upload_entry())));
}

#[test]
fn long_text_without_a_preceding_upload_is_kept() {
    let long = "y".repeat(500);
    let persisted = vec![
        raw(Role::User, "short prompt", None),
        raw(Role::User, &long, None),
        raw(Role::Assistant, &long, None),
    ];

    let rendered = reconcile(&persisted, &[]);

    assert_eq!(rendered.len(), 3);
    assert_eq!(rendered[1].content, long);
}

#[test]
fn long_assistant_reply_after_an_upload_is_kept() {
    let persisted = vec![upload_entry(), raw(Role::Assistant, &"z".repeat(300), None)];
    assert_eq!(reconcile(&persisted, &[]).len(), 2);
}

#[test]
fn lookback_uses_the_persisted_predecessor_even_when_it_was_dropped() {
    let long = "w".repeat(250);
    let persisted = vec![
        upload_entry(),
        raw(Role::User, &long, None),
        raw(Role::User, &long, None),
    ];

    let rendered = reconcile(&persisted, &[]);

    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[1].content, long);
}

#[test]
fn fresh_use_cases_replace_embedded_copies() {
    let persisted = vec![raw(
        Role::Assistant,
        "✅ Extracted 2 use cases in 1.2s",
        Some(json!({
            "use_cases": [
                { "id": "uc-1", "title": "Stale title", "main_flow": ["old"] },
                { "id": "uc-2", "title": "Untouched" }
            ],
            "validation_results": [{ "title": "Stale title", "quality_score": 65 }]
        })),
    )];
    let mut refined = fresh("uc-1", "Refined title");
    refined.main_flow = vec!["new".to_string()];

    let rendered = reconcile(&persisted, &[refined.clone()]);
    let refs = rendered[0].use_case_refs.as_ref().expect("use case refs");

    assert_eq!(refs[0], refined);
    assert_eq!(refs[1].title, "Untouched");
    assert_eq!(
        rendered[0].validation_results.as_ref().map(Vec::len),
        Some(1)
    );
}

#[test]
fn later_duplicate_fresh_id_wins() {
    let persisted = vec![raw(
        Role::Assistant,
        "",
        Some(json!({ "use_cases": [{ "use_case_id": 9, "title": "Embedded" }] })),
    )];

    let rendered = reconcile(&persisted, &[fresh("9", "first"), fresh("9", "second")]);

    assert_eq!(
        rendered[0].use_case_refs.as_ref().expect("refs")[0].title,
        "second"
    );
}

#[test]
fn order_and_plain_messages_are_preserved() {
    let persisted = vec![
        raw(Role::User, "one", None),
        raw(Role::Assistant, "two", Some(json!({ "note": true }))),
        RawMessage {
            role: Role::Other,
            content: None,
            metadata: None,
            timestamp: None,
        },
    ];

    let rendered = reconcile(&persisted, &[fresh("uc-1", "unused")]);

    let contents: Vec<&str> = rendered.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two", ""]);
    assert!(rendered.iter().all(|m| m.use_case_refs.is_none()));
    assert_eq!(rendered[0].timestamp, "2024-05-01T10:00:00Z");
    assert_eq!(rendered[2].timestamp, "");
}

#[test]
fn reconciling_twice_gives_the_same_transcript() {
    let persisted = vec![
        upload_entry(),
        raw(Role::User, &"x".repeat(400), None),
        raw(
            Role::Assistant,
            "done",
            Some(json!({ "use_cases": [{ "id": "uc-1", "title": "A" }] })),
        ),
    ];
    let fresh = vec![fresh("uc-1", "B")];

    assert_eq!(reconcile(&persisted, &fresh), reconcile(&persisted, &fresh));
}

#[test]
fn ingestion_echo_requires_a_previous_entry() {
    let long = raw(Role::User, &"x".repeat(300), None);
    assert!(!is_ingestion_echo(&long, None));
    assert!(is_ingestion_echo(&long, Some(&upload_entry())));
}
