use crate::aggregate::{calculate_aggregate_rankings, disqualified_from_stage1};
use crate::config::CouncilConfig;
use crate::contracts::parse_contract_ids;
use crate::error::CouncilError;
use crate::model::{CouncilMeta, CouncilRequest, CouncilResult};
use crate::roles::get_role_spec;
use crate::stage1;
use crate::stage2;
use crate::stage3;
use crate::transport::ChatClient;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Owns configuration and a chat transport; runs full deliberation rounds.
/// Per-stage diagnostics from the most recent run are kept behind a mutex
/// rather than module-level globals, so multiple engines in one process
/// (e.g. under test) never share state.
pub struct CouncilEngine {
    client: Arc<dyn ChatClient>,
    config: CouncilConfig,
    last_errors: Mutex<StageErrors>,
}

#[derive(Default, Clone)]
struct StageErrors {
    stage1: BTreeMap<String, String>,
    stage2: BTreeMap<String, String>,
    stage2_adjudicated: bool,
}

impl CouncilEngine {
    pub fn new(client: Arc<dyn ChatClient>, config: CouncilConfig) -> Self {
        Self { client, config, last_errors: Mutex::new(StageErrors::default()) }
    }

    pub fn last_stage1_errors(&self) -> BTreeMap<String, String> {
        self.last_errors.lock().expect("last_errors mutex poisoned").stage1.clone()
    }

    pub fn last_stage2_errors(&self) -> BTreeMap<String, String> {
        self.last_errors.lock().expect("last_errors mutex poisoned").stage2.clone()
    }

    pub async fn run(&self, request: CouncilRequest) -> Result<CouncilResult, CouncilError> {
        let stage1_models = self.config.stage1_models.clone();
        let contract_stack = request.contract_stack.as_deref();

        tracing::info!(generators = stage1_models.len(), "stage 1 generation started");
        let (stage1_entries, stage1_errors) = stage1::collect_responses(
            Arc::clone(&self.client),
            &request.user_prompt,
            contract_stack,
            &stage1_models,
        )
        .await?;

        let (candidates, stage2_entries, adjudicated) = stage2::collect_rankings(
            Arc::clone(&self.client),
            &request.user_prompt,
            &stage1_entries,
            &self.config,
        )
        .await;

        let disqualified = disqualified_from_stage1(&stage1_entries);
        let aggregates = calculate_aggregate_rankings(&stage2_entries, &candidates.label_to_model, &disqualified);

        tracing::info!(model = %self.config.chairman_model, "stage 3 synthesis started");
        let stage3_result = stage3::synthesize_final(
            self.client.as_ref(),
            &request.user_prompt,
            &stage1_entries,
            &stage2_entries,
            &aggregates,
            contract_stack,
            &self.config,
        )
        .await;

        let stage2_errors: BTreeMap<String, String> = stage2_entries
            .iter()
            .filter_map(|e| e.partial_reason.as_ref().map(|reason| (e.model.clone(), reason.clone())))
            .collect();

        {
            let mut guard = self.last_errors.lock().expect("last_errors mutex poisoned");
            guard.stage1 = stage1_errors;
            guard.stage2 = stage2_errors;
            guard.stage2_adjudicated = adjudicated;
        }

        let mut model_roles = BTreeMap::new();
        for model in stage1_models.iter().chain(self.config.stage2_models.iter()).chain([&self.config.chairman_model]) {
            model_roles.entry(model.clone()).or_insert_with(|| get_role_spec(model).name.to_string());
        }

        Ok(CouncilResult {
            stage1: stage1_entries,
            stage2: stage2_entries,
            stage3: stage3_result,
            meta: CouncilMeta {
                contract_stack: parse_contract_ids(contract_stack),
                label_to_model: candidates.label_to_model,
                aggregate_rankings: aggregates,
                model_roles: Some(model_roles),
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use async_trait::async_trait;

    struct ScriptedClient;

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn chat(&self, model: &str, _messages: &[Message], _temperature: f32) -> Result<String, CouncilError> {
            if model.contains("judge") || model == "anthropic/claude-opus-4.5" {
                Ok("A: Strength: clear; Flaw: terse.\nB: Strength: thorough; Flaw: verbose.\nFINAL_RANKING: Response B > Response A".to_string())
            } else {
                Ok(format!("a real answer from {model}"))
            }
        }
    }

    #[tokio::test]
    async fn full_round_produces_a_final_response() {
        let mut config = CouncilConfig::from_env();
        config.stage1_models = vec!["openai/a".to_string(), "anthropic/b".to_string()];
        config.stage2_models = vec!["judge/1".to_string()];
        config.chairman_model = "anthropic/claude-opus-4.5".to_string();
        config.adjudicate_enabled = false;

        let engine = CouncilEngine::new(Arc::new(ScriptedClient), config);
        let result = engine
            .run(CouncilRequest { user_prompt: "hello".to_string(), contract_stack: None })
            .await
            .unwrap();

        assert!(!result.stage3.response.is_empty());
        assert_eq!(result.stage1.len(), 2);
        assert_eq!(result.stage2.len(), 1);
        assert!(result.meta.model_roles.unwrap().contains_key("anthropic/claude-opus-4.5"));
    }
}
