use super::*;

#[test]
fn string_detail_is_used_verbatim() {
    let err = BackendError::from_body(404, r#"{"detail":"Session not found"}"#);
    assert_eq!(err.status, 404);
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.to_string(), "Session not found");
}

#[test]
fn structured_detail_is_kept_as_json_text() {
    let err = BackendError::from_body(422, r#"{"detail":[{"loc":["body","raw_text"]}]}"#);
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.detail, r#"[{"loc":["body","raw_text"]}]"#);
}

#[test]
fn non_json_body_and_empty_body() {
    let err = BackendError::from_body(502, "  Bad Gateway \n");
    assert_eq!(err.detail, "Bad Gateway");
    assert_eq!(err.code, ErrorCode::Internal);

    let err = BackendError::from_body(418, "");
    assert_eq!(err.detail, "request failed with status 418");
    assert_eq!(err.code, ErrorCode::Unknown);
}
