use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::CouncilConfig;
use crate::council::CouncilEngine;
use crate::model::CouncilRequest;
use crate::response::{ToolMetadata, ToolResponse};
use crate::transport::{ChatClient, HttpChatClient};

/// Parameters accepted by the `run_council` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCouncilRequest {
    /// The question or task to deliberate on.
    pub user_prompt: String,
    /// Comma-separated contract ids layered on top of the factory base contract.
    pub contract_stack: Option<String>,
}

impl From<RunCouncilRequest> for CouncilRequest {
    fn from(req: RunCouncilRequest) -> Self {
        CouncilRequest { user_prompt: req.user_prompt, contract_stack: req.contract_stack }
    }
}

fn validate_prompt(prompt: &str) -> Result<(), String> {
    if prompt.trim().is_empty() {
        Err("prompt must not be empty".to_string())
    } else {
        Ok(())
    }
}

#[derive(Clone)]
pub struct CouncilServer {
    engine: Arc<CouncilEngine>,
    default_chairman_model: String,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CouncilServer {
    pub fn new(config: CouncilConfig) -> Self {
        let client: Arc<dyn ChatClient> =
            Arc::new(HttpChatClient::new(config.api_base_url.clone(), config.api_key.clone(), config.max_tokens));
        let default_chairman_model = config.chairman_model.clone();
        let engine = Arc::new(CouncilEngine::new(client, config));
        Self { engine, default_chairman_model, tool_router: Self::tool_router() }
    }

    #[tool(
        name = "run_council",
        description = "Run a full multi-model deliberation round: independent generator models answer the prompt, judge models rank the anonymized answers, and a chairman model synthesizes the final response. Use for questions that benefit from cross-checking multiple models rather than trusting a single answer.",
        annotations(read_only_hint = true)
    )]
    async fn run_council(
        &self,
        Parameters(req): Parameters<RunCouncilRequest>,
    ) -> Result<CallToolResult, McpError> {
        validate_prompt(&req.user_prompt).map_err(|msg| McpError::invalid_params(msg, None))?;

        let start = Instant::now();
        let chairman_model = self.default_chairman_model.clone();

        let response = match self.engine.run(req.into()).await {
            Ok(result) => {
                let json = serde_json::to_string(&result)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?;
                ToolResponse::success(
                    json,
                    ToolMetadata {
                        tool_name: "run_council".to_string(),
                        chairman_model: result.stage3.model,
                        duration_seconds: start.elapsed().as_secs_f64(),
                    },
                )
            }
            Err(e) => {
                tracing::warn!("council run failed: {e}");
                ToolResponse::error(
                    e.user_message(),
                    ToolMetadata {
                        tool_name: "run_council".to_string(),
                        chairman_model,
                        duration_seconds: start.elapsed().as_secs_f64(),
                    },
                )
            }
        };

        Ok(response.into_call_tool_result())
    }
}

#[tool_handler]
impl ServerHandler for CouncilServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "council".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Council: multi-model deliberation via generate, peer-rank, synthesize.\n\n\
                 Tool:\n\
                 - `run_council`: Run one full round. Independent generator models answer the \
                 prompt, anonymized judge models rank the answers, and a chairman model writes \
                 the final synthesis.\n\n\
                 Contracts:\n\
                 - `contract_stack` layers named system-prompt policies onto every member. The \
                 factory truth-first contract is always applied first regardless of what's passed.\n\n\
                 Output:\n\
                 - The response JSON includes the final answer plus full stage1/stage2 \
                 transcripts and aggregate rankings, so a caller can audit how the answer was \
                 reached."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
