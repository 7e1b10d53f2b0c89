use crate::contracts::{build_contract_system_messages, evaluate_contract_compliance};
use crate::model::{ContractEval, ContractStatus, Stage1Entry};
use crate::roles::build_messages_for_model;
use crate::transport::{filter_provider_id, ChatClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::{Id as TaskId, JoinSet};

const GENERATOR_TEMPERATURE: f32 = 0.3;

fn synthetic_entry(model: &str) -> Stage1Entry {
    Stage1Entry {
        model: model.to_string(),
        response: "(No response from model.)".to_string(),
        contract_eval: ContractEval {
            stage: "stage1".to_string(),
            status: ContractStatus::Fail,
            eligible: false,
            hard_fail_reasons: vec!["Empty response".to_string()],
            warnings: Vec::new(),
            evaluated_at: chrono::Utc::now().to_rfc3339(),
        },
        synthetic: true,
        synthetic_reason: Some("stage1_empty_fallback".to_string()),
    }
}

async fn try_once(
    client: &dyn ChatClient,
    model: &str,
    user_prompt: &str,
    contract_stack: Option<&str>,
) -> Option<String> {
    let contract_msgs = build_contract_system_messages(contract_stack);
    let messages = build_messages_for_model(model, user_prompt, &contract_msgs, None);
    let text = client.chat(model, &messages, GENERATOR_TEMPERATURE).await.ok()?;
    let filtered = filter_provider_id(&text);
    if filtered.trim().is_empty() {
        None
    } else {
        Some(filtered)
    }
}

/// Fan out to every configured generator model concurrently. Always emits
/// exactly one entry per model — a failing or empty model gets a synthetic
/// contract-ineligible placeholder rather than being dropped, so downstream
/// stages never have to special-case a missing generator.
pub async fn collect_responses(
    client: Arc<dyn ChatClient>,
    user_prompt: &str,
    contract_stack: Option<&str>,
    models: &[String],
) -> Result<(Vec<Stage1Entry>, BTreeMap<String, String>), crate::error::CouncilError> {
    tracing::info!(generators = models.len(), "stage 1 dispatch started");
    let mut set: JoinSet<(String, Option<String>)> = JoinSet::new();
    let mut task_model_map: std::collections::HashMap<TaskId, String> = std::collections::HashMap::new();

    for model in models {
        let client = Arc::clone(&client);
        let model = model.clone();
        let prompt = user_prompt.to_string();
        let contract_stack = contract_stack.map(str::to_string);
        let model_for_map = model.clone();
        let handle = set.spawn(async move {
            let mut text = try_once(client.as_ref(), &model, &prompt, contract_stack.as_deref()).await;
            if text.is_none() && model.starts_with("google/") {
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
                text = try_once(client.as_ref(), &model, &prompt, contract_stack.as_deref()).await;
            }
            (model, text)
        });
        task_model_map.insert(handle.id(), model_for_map);
    }

    let mut by_model: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut errors: BTreeMap<String, String> = BTreeMap::new();

    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_id, (model, text))) => {
                if text.is_none() {
                    tracing::warn!(model, "generator returned no usable text");
                    errors.insert(model.clone(), "Empty response".to_string());
                }
                by_model.insert(model, text);
            }
            Err(join_err) => {
                if let Some(model) = task_model_map.get(&join_err.id()) {
                    tracing::warn!(model, error = %join_err, "generator task panicked");
                    errors.insert(model.clone(), join_err.to_string());
                    by_model.insert(model.clone(), None);
                }
            }
        }
    }

    let mut entries = Vec::with_capacity(models.len());
    let mut real_count = 0;
    for model in models {
        match by_model.get(model).cloned().flatten() {
            Some(text) => {
                let contract_eval = evaluate_contract_compliance(user_prompt, &text, contract_stack, "stage1");
                entries.push(Stage1Entry {
                    model: model.clone(),
                    response: text,
                    contract_eval,
                    synthetic: false,
                    synthetic_reason: None,
                });
                real_count += 1;
            }
            None => entries.push(synthetic_entry(model)),
        }
    }

    if real_count == 0 && !errors.is_empty() {
        tracing::warn!(failures = errors.len(), "every generator model failed");
        return Err(crate::error::CouncilError::Stage1AllFailed { errors });
    }

    tracing::info!(real_count, synthetic_count = entries.len() - real_count, "stage 1 dispatch finished");
    Ok((entries, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CouncilError;
    use crate::model::Message;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        responses: std::collections::HashMap<String, String>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for FakeClient {
        async fn chat(&self, model: &str, _messages: &[Message], _temperature: f32) -> Result<String, CouncilError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(model) {
                Some(r) => Ok(r.clone()),
                None => Err(CouncilError::EmptyResponse { provider: model.to_string() }),
            }
        }
    }

    #[tokio::test]
    async fn emits_one_entry_per_model_including_failures() {
        let mut responses = std::collections::HashMap::new();
        responses.insert("openai/a".to_string(), "a real answer".to_string());
        let client = Arc::new(FakeClient { responses, call_count: AtomicUsize::new(0) });
        let models = vec!["openai/a".to_string(), "anthropic/b".to_string()];
        let (entries, errors) = collect_responses(client, "hello", None, &models).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].synthetic);
        assert!(entries[1].synthetic);
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn all_failing_returns_stage1_all_failed() {
        let client = Arc::new(FakeClient { responses: std::collections::HashMap::new(), call_count: AtomicUsize::new(0) });
        let models = vec!["openai/a".to_string()];
        let result = collect_responses(client, "hello", None, &models).await;
        assert!(matches!(result, Err(CouncilError::Stage1AllFailed { .. })));
    }
}
