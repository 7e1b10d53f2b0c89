use council::response::{ToolMetadata, ToolResponse};

#[test]
fn success_response_serializes_correctly() {
    let response = ToolResponse::success(
        "{}".to_string(),
        ToolMetadata {
            tool_name: "run_council".to_string(),
            chairman_model: "anthropic/claude-opus-4.5".to_string(),
            duration_seconds: 4.2,
        },
    );

    let json_str = serde_json::to_string(&response).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

    assert_eq!(parsed["status"], "success");
    assert_eq!(parsed["metadata"]["tool_name"], "run_council");
    assert_eq!(parsed["metadata"]["chairman_model"], "anthropic/claude-opus-4.5");
    assert!(parsed["metadata"]["duration_seconds"].is_f64());
}

#[test]
fn error_response_carries_message_in_payload_not_transport() {
    let response = ToolResponse::error(
        "every generator model failed to respond".to_string(),
        ToolMetadata {
            tool_name: "run_council".to_string(),
            chairman_model: String::new(),
            duration_seconds: 0.001,
        },
    );

    let result = response.into_call_tool_result();
    assert_ne!(result.is_error, Some(true));
}

#[test]
fn non_finite_duration_is_clamped() {
    let response = ToolResponse::success(
        "{}".to_string(),
        ToolMetadata {
            tool_name: "run_council".to_string(),
            chairman_model: "m".to_string(),
            duration_seconds: f64::NAN,
        },
    );
    // must not panic during serialization
    let _ = response.into_call_tool_result();
}
