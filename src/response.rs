use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

/// Envelope returned by every tool. Always reports MCP-level success so a
/// failed deliberation round doesn't cascade into the caller's own
/// tool-call error handling — failure detail lives in `status`/`content`.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: &'static str,
    pub content: String,
    pub content_type: &'static str,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub chairman_model: String,
    pub duration_seconds: f64,
}

impl ToolResponse {
    pub fn success(content: String, metadata: ToolMetadata) -> Self {
        Self { status: "success", content, content_type: "application/json", metadata }
    }

    pub fn error(message: String, metadata: ToolMetadata) -> Self {
        Self { status: "error", content: message, content_type: "text", metadata }
    }

    pub fn into_call_tool_result(self) -> CallToolResult {
        let safe = ToolResponseSafe {
            status: self.status,
            content: self.content,
            content_type: self.content_type,
            metadata: ToolMetadataSafe {
                tool_name: self.metadata.tool_name,
                chairman_model: self.metadata.chairman_model,
                duration_seconds: clamp_finite(self.metadata.duration_seconds),
            },
        };

        match serde_json::to_string(&safe) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::success(vec![Content::text(format!(
                r#"{{"status":"error","content":"serialization failed: {e}","content_type":"text","metadata":{{}}}}"#
            ))]),
        }
    }
}

fn clamp_finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[derive(Serialize)]
struct ToolResponseSafe {
    status: &'static str,
    content: String,
    content_type: &'static str,
    metadata: ToolMetadataSafe,
}

#[derive(Serialize)]
struct ToolMetadataSafe {
    tool_name: String,
    chairman_model: String,
    duration_seconds: f64,
}
