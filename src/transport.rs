use crate::error::CouncilError;
use crate::model::Message;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum time to wait for response headers after sending the request.
pub const HEADERS_TIMEOUT: Duration = Duration::from_secs(60);
/// Maximum time to wait for a full non-streaming completion.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Anything that can answer a chat turn for one model. Exists so the
/// deliberation stages can be tested against a fake without real network
/// calls.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, model: &str, messages: &[Message], temperature: f32) -> Result<String, CouncilError>;
}

pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

impl HttpChatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, max_tokens: u32) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(GENERATION_TIMEOUT)
            .build()
            .expect("reqwest client builder should never fail with these settings");
        Self { client, base_url: base_url.into(), api_key: api_key.into(), max_tokens }
    }
}

#[async_trait::async_trait]
impl ChatClient for HttpChatClient {
    async fn chat(&self, model: &str, messages: &[Message], temperature: f32) -> Result<String, CouncilError> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": self.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let send_future = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(HEADERS_TIMEOUT, send_future)
            .await
            .map_err(|_| CouncilError::Timeout { provider: model.to_string(), ms: HEADERS_TIMEOUT.as_millis() as u64 })??;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CouncilError::RateLimited { provider: model.to_string() });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CouncilError::AuthFailed { provider: model.to_string() });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CouncilError::Upstream { provider: model.to_string(), message: text });
        }

        let value: Value = response.json().await?;
        let content = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .cloned()
            .unwrap_or(Value::Null);

        let text = content_to_text(&content);
        let filtered = filter_provider_id(&text);
        if !filtered.is_empty() {
            return Ok(filtered);
        }

        let deep = deep_extract_text(&value).unwrap_or_default();
        Ok(filter_provider_id(&deep))
    }
}

/// Flatten a provider's `message.content` shape (string, list of parts, or a
/// dict carrying `text`/`text.value`/`content`) into plain text.
pub fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(content_to_text).collect::<Vec<_>>().join(""),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                return s.clone();
            }
            if let Some(Value::Object(text_obj)) = map.get("text") {
                if let Some(Value::String(s)) = text_obj.get("value") {
                    return s.clone();
                }
            }
            if let Some(inner) = map.get("content") {
                return content_to_text(inner);
            }
            String::new()
        }
        _ => String::new(),
    }
}

static GEN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^gen-\d{6,}-[A-Za-z0-9_\-]{8,}$").unwrap());
static COMPLETION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(chatcmpl|cmpl|req|request|run|msg)-[A-Za-z0-9\-]{12,}$").unwrap()
});
static BARE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-]{24,}$").unwrap());

/// True if `text` looks like nothing but a provider-internal generation id
/// rather than real model output.
pub fn looks_like_provider_id(text: &str) -> bool {
    let t = text.trim();
    if t.is_empty() {
        return false;
    }
    GEN_ID_RE.is_match(t) || COMPLETION_ID_RE.is_match(t) || (BARE_ID_RE.is_match(t) && !t.contains(char::is_whitespace))
}

/// Drop text that is just a provider id, returning empty string instead.
pub fn filter_provider_id(text: &str) -> String {
    if looks_like_provider_id(text) {
        String::new()
    } else {
        text.to_string()
    }
}

static SKIP_KEYS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "id",
        "request_id",
        "generation_id",
        "gen_id",
        "model",
        "provider",
        "usage",
        "created",
        "created_at",
        "timestamp",
        "object",
        "finish_reason",
        "system_fingerprint",
    ]
    .into_iter()
    .collect()
});

fn is_text_key(key: &str) -> bool {
    matches!(key, "content" | "text" | "value" | "output_text") || key.ends_with("content")
}

/// Recursively scan a JSON value for plausible response text when the
/// expected `choices[0].message.content` path came back empty, skipping
/// known metadata keys. Returns the longest non-id candidate found.
pub fn deep_extract_text(value: &Value) -> Option<String> {
    let mut best: Option<String> = None;
    walk_deep_extract(value, &mut best);
    best
}

fn walk_deep_extract(value: &Value, best: &mut Option<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if SKIP_KEYS.contains(key.as_str()) || key.ends_with("_id") {
                    continue;
                }
                if is_text_key(key) {
                    if let Value::String(s) = v {
                        if !looks_like_provider_id(s) && best.as_ref().map(|b| s.len() > b.len()).unwrap_or(true) {
                            *best = Some(s.clone());
                        }
                    }
                }
                walk_deep_extract(v, best);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_deep_extract(item, best);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_to_text_handles_plain_string() {
        assert_eq!(content_to_text(&Value::String("hi".into())), "hi");
    }

    #[test]
    fn content_to_text_handles_list_of_parts() {
        let v = serde_json::json!([{"text": "a"}, {"text": "b"}]);
        assert_eq!(content_to_text(&v), "ab");
    }

    #[test]
    fn content_to_text_handles_text_value_wrapper() {
        let v = serde_json::json!({"text": {"value": "wrapped"}});
        assert_eq!(content_to_text(&v), "wrapped");
    }

    #[test]
    fn provider_id_detection() {
        assert!(looks_like_provider_id("gen-123456-abcdefgh"));
        assert!(looks_like_provider_id("chatcmpl-abcdefghijklmno"));
        assert!(looks_like_provider_id("aB3dE6gH9jK2mN5pQ8rS1tU4"));
        assert!(!looks_like_provider_id("The answer is 42."));
        assert!(!looks_like_provider_id(""));
    }

    #[test]
    fn deep_extract_skips_metadata_keys() {
        let v = serde_json::json!({
            "id": "chatcmpl-abcdefghijklmno",
            "model": "gpt-5.2",
            "choices": [{"message": {"content": "the real answer"}}]
        });
        assert_eq!(deep_extract_text(&v).as_deref(), Some("the real answer"));
    }
}
