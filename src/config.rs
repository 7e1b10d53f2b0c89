use crate::parser::dedupe_preserve_order;
use std::env;

const DEFAULT_STAGE1_MODEL_A: &str = "openai/gpt-5.2";
const DEFAULT_STAGE1_MODEL_B: &str = "google/gemini-3-pro-preview";
const DEFAULT_STAGE1_MODEL_C: &str = "anthropic/claude-sonnet-4.5";
const DEFAULT_STAGE1_MODEL_D: &str = "x-ai/grok-4.1-fast";

const DEFAULT_STAGE2_MODEL_A: &str = "openai/gpt-5.2";
const DEFAULT_STAGE2_MODEL_B: &str = "anthropic/claude-opus-4.5";
const DEFAULT_STAGE2_MODEL_C: &str = "anthropic/claude-sonnet-4.5";
const DEFAULT_STAGE2_MODEL_D: &str = "x-ai/grok-4.1-fast";

const DEFAULT_CHAIRMAN_MODEL: &str = "anthropic/claude-opus-4.5";
const DEFAULT_STAGE3_HELPER_MODEL: &str = "google/gemini-3-pro-preview";
const DEFAULT_ADJUDICATOR_MODEL: &str = "anthropic/claude-opus-4.5";
const DEFAULT_ADJUDICATOR_FALLBACKS: &str =
    "google/gemini-3-pro-preview,openai/gpt-4.1,anthropic/claude-haiku-3.5";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Council-wide configuration assembled from the environment. Missing API
/// keys are warned about, never treated as fatal — callers find out at
/// dispatch time if a model they asked for has no credentials.
pub struct CouncilConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub max_tokens: u32,

    pub stage1_models: Vec<String>,
    pub stage2_models: Vec<String>,
    pub chairman_model: String,

    pub stage3_helper_enabled: bool,
    pub stage3_helper_model: String,
    pub stage3_helper_trigger_chars: usize,

    pub adjudicate_enabled: bool,
    pub adjudicator_model: String,
    pub adjudicator_fallbacks: Vec<String>,
    pub adjudicate_min_nonpartial: usize,
    pub adjudicate_min_top1_votes: usize,
    pub evidence_min_lines: usize,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl CouncilConfig {
    pub fn from_env() -> Self {
        // OpenRouter is preferred over raw OpenAI — it fronts every provider
        // the default model roster names (openai/, anthropic/, google/, x-ai/).
        let (api_base_url, api_key) = if let Ok(key) = env::var("OPENROUTER_API_KEY") {
            (env_string("OPENROUTER_BASE_URL", DEFAULT_OPENROUTER_BASE_URL), key)
        } else if let Ok(key) = env::var("OPENAI_API_KEY") {
            tracing::warn!("OPENROUTER_API_KEY not set — falling back to OPENAI_API_KEY, non-OpenAI model ids will fail");
            (env_string("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL), key)
        } else {
            tracing::error!("neither OPENROUTER_API_KEY nor OPENAI_API_KEY set — no model can be queried");
            (env_string("OPENROUTER_BASE_URL", DEFAULT_OPENROUTER_BASE_URL), String::new())
        };

        let max_tokens = env_usize("COUNCIL_MAX_TOKENS", 2048) as u32;

        let stage1_models = vec![
            env_string("STAGE1_MODEL_A", DEFAULT_STAGE1_MODEL_A),
            env_string("STAGE1_MODEL_B", DEFAULT_STAGE1_MODEL_B),
            env_string("STAGE1_MODEL_C", DEFAULT_STAGE1_MODEL_C),
            env_string("STAGE1_MODEL_D", DEFAULT_STAGE1_MODEL_D),
        ];
        // Judge models are a deduplicated list — the same model can't judge twice.
        let stage2_models = dedupe_preserve_order(vec![
            env_string("STAGE2_MODEL_A", DEFAULT_STAGE2_MODEL_A),
            env_string("STAGE2_MODEL_B", DEFAULT_STAGE2_MODEL_B),
            env_string("STAGE2_MODEL_C", DEFAULT_STAGE2_MODEL_C),
            env_string("STAGE2_MODEL_D", DEFAULT_STAGE2_MODEL_D),
        ]);

        let adjudicator_fallbacks = env_string("STAGE2_ADJUDICATOR_FALLBACKS", DEFAULT_ADJUDICATOR_FALLBACKS)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            api_base_url,
            api_key,
            max_tokens,
            stage1_models,
            stage2_models,
            chairman_model: env_string("CHAIRMAN_MODEL", DEFAULT_CHAIRMAN_MODEL),
            stage3_helper_enabled: env_flag("STAGE3_HELPER_ENABLED", false),
            stage3_helper_model: env_string("STAGE3_HELPER_MODEL", DEFAULT_STAGE3_HELPER_MODEL),
            stage3_helper_trigger_chars: env_usize("STAGE3_HELPER_TRIGGER_CHARS", 120_000),
            adjudicate_enabled: env_flag("STAGE2_ADJUDICATE_ENABLED", true),
            adjudicator_model: env_string("STAGE2_ADJUDICATOR_MODEL", DEFAULT_ADJUDICATOR_MODEL),
            adjudicator_fallbacks,
            adjudicate_min_nonpartial: env_usize("STAGE2_ADJUDICATE_MIN_NONPARTIAL", 3),
            adjudicate_min_top1_votes: env_usize("STAGE2_ADJUDICATE_MIN_TOP1_VOTES", 0),
            evidence_min_lines: env_usize("STAGE2_EVIDENCE_MIN_LINES", 3),
        }
    }
}
