use thiserror::Error;

/// Error taxonomy for the deliberation pipeline.
///
/// `ContractFail` is deliberately absent here — a contract violation never
/// raises, it is recorded as a `ContractEval` and marks an entry ineligible.
#[derive(Debug, Error)]
pub enum CouncilError {
    #[error("timeout after {ms}ms querying {provider}")]
    Timeout { provider: String, ms: u64 },

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream { provider: String, message: String },

    #[error("auth failed for {provider}")]
    AuthFailed { provider: String },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("provider returned a bare id instead of content: {provider}")]
    ProviderIdResponse { provider: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stage 1 failed for every generator model: {errors:?}")]
    Stage1AllFailed { errors: std::collections::BTreeMap<String, String> },

    #[error("{0}")]
    Other(String),
}

impl CouncilError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Timeout { provider, .. } => Some(provider),
            Self::RateLimited { provider } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
            Self::AuthFailed { provider } => Some(provider),
            Self::EmptyResponse { provider } => Some(provider),
            Self::ProviderIdResponse { provider } => Some(provider),
            _ => None,
        }
    }

    /// Sanitized error message safe for returning to a caller — never leaks
    /// upstream bodies, URLs, or credentials.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { provider, ms } => {
                format!("request to {provider} timed out after {ms}ms")
            }
            Self::RateLimited { provider } => {
                format!("rate limited by {provider} — try again shortly")
            }
            Self::Upstream { provider, .. } => format!("upstream error from {provider}"),
            Self::AuthFailed { provider } => format!("authentication failed for {provider}"),
            Self::EmptyResponse { provider } => format!("empty response from {provider}"),
            Self::ProviderIdResponse { provider } => {
                format!("{provider} returned a provider id instead of content")
            }
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Stage1AllFailed { .. } => {
                "every generator model failed to respond".to_string()
            }
            Self::Other(_) => "an error occurred".to_string(),
        }
    }
}
