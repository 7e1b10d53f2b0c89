use async_trait::async_trait;
use council::config::CouncilConfig;
use council::council::CouncilEngine;
use council::error::CouncilError;
use council::model::{CouncilRequest, Message};
use council::transport::ChatClient;
use std::sync::Arc;

struct ScriptedClient {
    judge_reply: String,
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat(&self, model: &str, _messages: &[Message], _temperature: f32) -> Result<String, CouncilError> {
        if model.starts_with("judge/") || model.contains("opus") {
            Ok(self.judge_reply.clone())
        } else if model == "silent/model" {
            Ok(String::new())
        } else {
            Ok(format!("a thorough and concrete answer from {model} about the prompt"))
        }
    }
}

fn base_config() -> CouncilConfig {
    let mut config = CouncilConfig::from_env();
    config.stage1_models = vec!["openai/a".to_string(), "anthropic/b".to_string()];
    config.stage2_models = vec!["judge/1".to_string(), "judge/2".to_string()];
    config.chairman_model = "anthropic/claude-opus-4.5".to_string();
    config.adjudicate_enabled = false;
    config
}

#[tokio::test]
async fn full_round_returns_synthesized_answer_and_full_transcript() {
    let client = Arc::new(ScriptedClient {
        judge_reply: "A: Strength: clear and concrete; Flaw: terse overall.\nB: Strength: thorough and detailed; Flaw: verbose writing.\nFINAL_RANKING: Response B > Response A".to_string(),
    });
    let engine = CouncilEngine::new(client, base_config());

    let result = engine
        .run(CouncilRequest { user_prompt: "how should we design this".to_string(), contract_stack: None })
        .await
        .unwrap();

    assert!(!result.stage3.response.is_empty());
    assert_eq!(result.stage1.len(), 2);
    assert_eq!(result.stage2.len(), 2);
    assert_eq!(result.meta.aggregate_rankings.len(), 2);
    assert!(result.stage1.iter().all(|e| !e.synthetic));
}

#[tokio::test]
async fn a_generator_that_returns_nothing_gets_a_synthetic_placeholder() {
    let mut config = base_config();
    config.stage1_models = vec!["openai/a".to_string(), "silent/model".to_string()];
    let client = Arc::new(ScriptedClient {
        judge_reply: "A: Strength: clear; Flaw: short.\nB: Strength: ok; Flaw: vague.\nFINAL_RANKING: Response A > Response B".to_string(),
    });
    let engine = CouncilEngine::new(client, config);

    let result = engine
        .run(CouncilRequest { user_prompt: "what should we do".to_string(), contract_stack: None })
        .await
        .unwrap();

    let silent_entry = result.stage1.iter().find(|e| e.model == "silent/model").unwrap();
    assert!(silent_entry.synthetic);
    assert!(!silent_entry.contract_eval.eligible);
}

#[tokio::test]
async fn all_generators_failing_surfaces_stage1_all_failed() {
    struct AllFailClient;
    #[async_trait]
    impl ChatClient for AllFailClient {
        async fn chat(&self, model: &str, _messages: &[Message], _temperature: f32) -> Result<String, CouncilError> {
            Err(CouncilError::EmptyResponse { provider: model.to_string() })
        }
    }
    let config = base_config();
    let engine = CouncilEngine::new(Arc::new(AllFailClient), config);

    let result = engine
        .run(CouncilRequest { user_prompt: "anything".to_string(), contract_stack: None })
        .await;

    assert!(matches!(result, Err(CouncilError::Stage1AllFailed { .. })));
}

#[tokio::test]
async fn contract_violation_disqualifies_generator_from_aggregate_weight() {
    let mut config = base_config();
    config.stage1_models = vec!["openai/a".to_string(), "anthropic/dosing".to_string()];
    struct DosingClient;
    #[async_trait]
    impl ChatClient for DosingClient {
        async fn chat(&self, model: &str, _messages: &[Message], _temperature: f32) -> Result<String, CouncilError> {
            if model.starts_with("judge") || model.contains("opus") {
                Ok("A: Strength: clear; Flaw: short.\nB: Strength: ok; Flaw: vague.\nFINAL_RANKING: Response B > Response A".to_string())
            } else if model == "anthropic/dosing" {
                Ok("take 5 mg twice daily for relief".to_string())
            } else {
                Ok(format!("a thorough and concrete answer from {model}"))
            }
        }
    }
    let engine = CouncilEngine::new(Arc::new(DosingClient), config);
    let result = engine
        .run(CouncilRequest { user_prompt: "help with medication".to_string(), contract_stack: None })
        .await
        .unwrap();

    let dosing_aggregate = result.meta.aggregate_rankings.iter().find(|a| a.model == "anthropic/dosing").unwrap();
    assert!(dosing_aggregate.disqualified);
}
