use super::*;
use serde_json::json;

#[test]
fn classify_prefers_results_over_generated_use_cases() {
    let both = json!({ "results": [], "generated_use_cases": [{ "title": "x" }] });
    assert_eq!(ResponseShape::classify(&both), ResponseShape::ResultsArray);

    let generated = json!({ "generated_use_cases": [] });
    assert_eq!(
        ResponseShape::classify(&generated),
        ResponseShape::GeneratedUseCases
    );

    let neither = json!({ "results": "not an array" });
    assert_eq!(ResponseShape::classify(&neither), ResponseShape::Neither);
    assert_eq!(ResponseShape::classify(&json!(null)), ResponseShape::Neither);
}

#[test]
fn results_and_generated_use_cases_normalize_identically() {
    let entries = json!([
        { "id": 7, "title": "Checkout", "main_flows": [["pick", "pay"], ["ship"]] },
        { "use_case_id": "uc-2", "title": "Refund" }
    ]);
    let from_results = normalize_extraction(&json!({ "results": entries.clone() }));
    let from_generated = normalize_extraction(&json!({ "generated_use_cases": entries }));

    assert_eq!(from_results.results, from_generated.results);
    assert_eq!(from_results.extracted_count, 2);
}

#[test]
fn normalization_is_total_for_junk_input() {
    for input in [
        json!(null),
        json!(42),
        json!("text"),
        json!([1, 2, 3]),
        json!({ "results": [null, 3, "x", { "title": null }] }),
        json!({ "extracted_count": "many", "processing_time_seconds": "slow" }),
    ] {
        let outcome = normalize_extraction(&input);
        assert!(outcome.results.iter().all(|uc| !uc.title.is_empty()));
    }
}

#[test]
fn missing_fields_take_defaults() {
    let outcome = normalize_extraction(&json!({ "results": [{}] }));
    let use_case = &outcome.results[0];

    assert_eq!(use_case, &UseCase::untitled());
    assert_eq!(use_case.title, "Untitled");
    assert_eq!(use_case.status, "stored");
    assert!(!use_case.is_refinable());
    assert_eq!(outcome.session_id, None);
    assert_eq!(outcome.processing_time_seconds, None);
}

#[test]
fn main_flows_are_flattened_one_level() {
    let use_case = normalize_use_case(&json!({
        "main_flows": [["a", "b"], "c", ["d", ["e"]]]
    }));
    assert_eq!(use_case.main_flow, vec!["a", "b", "c", "d", "[\"e\"]"]);
}

#[test]
fn main_flow_wins_over_main_flows() {
    let use_case = normalize_use_case(&json!({
        "main_flow": ["direct"],
        "main_flows": [["nested"]]
    }));
    assert_eq!(use_case.main_flow, vec!["direct"]);
}

#[test]
fn list_items_drop_nulls_and_stringify_scalars() {
    let use_case = normalize_use_case(&json!({
        "preconditions": ["logged in", null, 3, true],
        "stakeholders": "not a list"
    }));
    assert_eq!(use_case.preconditions, vec!["logged in", "3", "true"]);
    assert!(use_case.stakeholders.is_empty());
}

#[test]
fn id_falls_back_to_use_case_id() {
    let by_id = normalize_use_case(&json!({ "id": "a", "use_case_id": "b" }));
    assert_eq!(by_id.id, Some(UseCaseId::new("a")));

    let by_fallback = normalize_use_case(&json!({ "id": "", "use_case_id": 12 }));
    assert_eq!(by_fallback.id, Some(UseCaseId::new("12")));
}

#[test]
fn quality_score_falls_back_to_matching_validation_result() {
    let outcome = normalize_extraction(&json!({
        "results": [
            { "title": "Login" },
            { "title": "Logout", "quality_score": 55 }
        ],
        "validation_results": [
            { "title": "Login", "quality_score": 82.5 },
            { "title": "Logout", "quality_score": 99 }
        ]
    }));

    assert_eq!(outcome.results[0].quality_score, Some(82.5));
    assert_eq!(outcome.results[1].quality_score, Some(55.0));
    assert_eq!(outcome.validation_results.len(), 2);
}

#[test]
fn extracted_count_must_be_a_non_negative_number() {
    let entries = json!([{ "title": "a" }, { "title": "b" }]);

    let explicit = normalize_extraction(&json!({ "results": entries.clone(), "extracted_count": 5.9 }));
    assert_eq!(explicit.extracted_count, 5);

    let fraction = normalize_extraction(&json!({ "results": entries.clone(), "extracted_count": 0.5 }));
    assert_eq!(fraction.extracted_count, 0);

    let zero = normalize_extraction(&json!({ "results": entries.clone(), "extracted_count": 0 }));
    assert_eq!(zero.extracted_count, 0);

    let negative = normalize_extraction(&json!({ "results": entries.clone(), "extracted_count": -1 }));
    assert_eq!(negative.extracted_count, 2);

    let negative_fraction =
        normalize_extraction(&json!({ "results": entries.clone(), "extracted_count": -0.5 }));
    assert_eq!(negative_fraction.extracted_count, 2);

    let textual = normalize_extraction(&json!({ "results": entries, "extracted_count": "5" }));
    assert_eq!(textual.extracted_count, 2);
}

#[test]
fn normalizing_a_normalized_use_case_is_a_no_op() {
    let first = normalize_use_case(&json!({
        "id": 3,
        "title": "Browse",
        "status": "draft",
        "main_flows": [["open", "scroll"]],
        "outcomes": ["found"],
        "quality_score": 71
    }));
    let reserialized = serde_json::to_value(&first).expect("serialize");
    let second = normalize_use_case(&reserialized);

    assert_eq!(first, second);
}

#[test]
fn top_level_fields_are_carried_over() {
    let outcome = normalize_extraction(&json!({
        "session_id": "s-1",
        "message": "done",
        "processing_time_seconds": 1.25,
        "results": []
    }));
    assert_eq!(outcome.session_id, Some(SessionId::new("s-1")));
    assert_eq!(outcome.message.as_deref(), Some("done"));
    assert_eq!(outcome.processing_time_seconds, Some(1.25));
    assert_eq!(outcome.extracted_count, 0);
}

#[test]
fn apply_refinement_overlays_only_present_fields() {
    let base = normalize_use_case(&json!({
        "id": "uc-1",
        "title": "Order",
        "main_flow": ["a"],
        "stakeholders": ["buyer"],
        "quality_score": 40
    }));
    let patched = apply_refinement(
        &base,
        &json!({ "main_flows": [["a", "b"]], "quality_score": 70, "stakeholders": null }),
    );

    assert_eq!(patched.id, base.id);
    assert_eq!(patched.title, "Order");
    assert_eq!(patched.main_flow, vec!["a", "b"]);
    assert_eq!(patched.stakeholders, vec!["buyer"]);
    assert_eq!(patched.quality_score, Some(70.0));
    assert!(patched.refined);
}
