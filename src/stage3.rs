use crate::contracts::{build_chairman_contract_system_messages, evaluate_contract_compliance};
use crate::model::{Aggregate, ContractEval, ContractStatus, Message, Stage1Entry, Stage2Entry, Stage3Result};
use crate::roles::get_role_spec;
use crate::transport::ChatClient;

const CHAIRMAN_TEMPERATURE: f32 = 0.2;
const HELPER_TEMPERATURE: f32 = 0.1;
const TOP_N_FULL_TEXT: usize = 2;
const TRUNCATED_CHARS: usize = 4000;

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}…")
    }
}

fn stage3_helper_system_message() -> &'static str {
    concat!(
        "STAGE 3 HELPER MODE.\n",
        "Write a compact briefing (6-12 bullets) summarizing the candidate responses and the aggregate rankings\n",
        "for the chairman model, who cannot see the full text due to length.\n",
        "Reference concrete details from the responses. Do not invent facts not present in the material.\n",
    )
}

fn chairman_messages(
    user_prompt: &str,
    body: &str,
    contract_stack: Option<&str>,
    chairman_model: &str,
) -> Vec<Message> {
    let mut msgs = build_chairman_contract_system_messages(contract_stack);
    let role = get_role_spec(chairman_model);
    msgs.push(Message::system(role.system));
    msgs.push(Message::user(format!("{user_prompt}\n\n{body}")));
    msgs
}

fn build_base_chairman_prompt(
    stage1: &[Stage1Entry],
    stage2: &[Stage2Entry],
    aggregates: &[Aggregate],
) -> String {
    let s1_json: Vec<serde_json::Value> = stage1
        .iter()
        .map(|e| {
            serde_json::json!({
                "model": e.model,
                "response": e.response,
                "contract_eval": {"status": format!("{:?}", e.contract_eval.status), "eligible": e.contract_eval.eligible},
            })
        })
        .collect();
    let s2_json: Vec<serde_json::Value> = stage2
        .iter()
        .map(|e| {
            serde_json::json!({
                "model": e.model,
                "ranking": e.canonical_ranking,
                "parsed_ranking": e.parsed_ranking,
                "synthetic": e.synthetic,
                "partial": e.partial,
                "partial_reason": e.partial_reason,
            })
        })
        .collect();
    let agg_json = serde_json::to_string_pretty(aggregates).unwrap_or_default();
    format!(
        "CHAIRMAN MODE.\nSynthesize the single best final answer for the user from the material below.\n\
         Stage 1 candidate responses:\n{}\n\nStage 2 judge rankings:\n{}\n\nAggregate rankings:\n{}\n",
        serde_json::to_string_pretty(&s1_json).unwrap_or_default(),
        serde_json::to_string_pretty(&s2_json).unwrap_or_default(),
        agg_json,
    )
}

async fn maybe_compress_with_helper(
    client: &dyn ChatClient,
    base_prompt: &str,
    stage1: &[Stage1Entry],
    aggregates: &[Aggregate],
    helper_model: &str,
    helper_trigger_chars: usize,
    helper_enabled: bool,
) -> Option<String> {
    if !helper_enabled || base_prompt.chars().count() <= helper_trigger_chars {
        return None;
    }
    let helper_messages = vec![
        Message::system(stage3_helper_system_message()),
        Message::user(base_prompt.to_string()),
    ];
    let briefing = client.chat(helper_model, &helper_messages, HELPER_TEMPERATURE).await.ok()?;
    if briefing.trim().is_empty() {
        return None;
    }

    let by_model: std::collections::BTreeMap<&str, &str> =
        stage1.iter().map(|e| (e.model.as_str(), e.response.as_str())).collect();
    let top_models: Vec<&str> = aggregates.iter().filter(|a| !a.disqualified).take(TOP_N_FULL_TEXT).map(|a| a.model.as_str()).collect();

    let mut sections = vec![format!("Briefing:\n{briefing}"), format!(
        "Aggregate rankings:\n{}",
        serde_json::to_string_pretty(aggregates).unwrap_or_default()
    )];
    for (model, text) in &by_model {
        let body = if top_models.contains(model) {
            text.to_string()
        } else {
            truncate(text, TRUNCATED_CHARS)
        };
        sections.push(format!("{model}:\n{body}"));
    }
    Some(sections.join("\n\n"))
}

/// Synthesize the final answer. If the chairman's first draft fails contract
/// compliance, exactly one repair attempt is made before returning whatever
/// the chairman produced last.
pub async fn synthesize_final(
    client: &dyn ChatClient,
    user_prompt: &str,
    stage1: &[Stage1Entry],
    stage2: &[Stage2Entry],
    aggregates: &[Aggregate],
    contract_stack: Option<&str>,
    config: &crate::config::CouncilConfig,
) -> Stage3Result {
    let base_prompt = build_base_chairman_prompt(stage1, stage2, aggregates);

    let body = maybe_compress_with_helper(
        client,
        &base_prompt,
        stage1,
        aggregates,
        &config.stage3_helper_model,
        config.stage3_helper_trigger_chars,
        config.stage3_helper_enabled,
    )
    .await
    .unwrap_or(base_prompt);

    let messages = chairman_messages(user_prompt, &body, contract_stack, &config.chairman_model);
    tracing::info!(model = %config.chairman_model, "stage 3 chairman dispatch started");
    let draft = match client.chat(&config.chairman_model, &messages, CHAIRMAN_TEMPERATURE).await {
        Ok(draft) => draft,
        Err(err) => {
            tracing::warn!(model = %config.chairman_model, error = %err, "chairman transport failed, no final answer produced");
            return Stage3Result {
                model: config.chairman_model.clone(),
                response: String::new(),
                contract_eval: ContractEval {
                    stage: "stage3".to_string(),
                    status: ContractStatus::Fail,
                    eligible: false,
                    hard_fail_reasons: vec!["chairman model failed to respond".to_string()],
                    warnings: vec![],
                    evaluated_at: chrono::Utc::now().to_rfc3339(),
                },
                repaired: false,
            };
        }
    };

    let mut eval = evaluate_contract_compliance(user_prompt, &draft, contract_stack, "stage3");
    let mut response = draft;
    let mut repaired = false;

    if eval.status == ContractStatus::Fail {
        let repair_prompt = format!(
            "Your previous draft violated the contract:\n{:?}\n\nOriginal draft:\n{response}\n\nProduce a corrected final answer.",
            eval.hard_fail_reasons
        );
        let repair_messages = chairman_messages(user_prompt, &repair_prompt, contract_stack, &config.chairman_model);
        if let Ok(repaired_draft) = client.chat(&config.chairman_model, &repair_messages, CHAIRMAN_TEMPERATURE).await {
            if !repaired_draft.trim().is_empty() {
                let repaired_eval = evaluate_contract_compliance(user_prompt, &repaired_draft, contract_stack, "stage3");
                response = repaired_draft;
                eval = repaired_eval;
                repaired = true;
            }
        }
    }

    tracing::info!(model = %config.chairman_model, status = ?eval.status, repaired, "stage 3 synthesis finished");
    Stage3Result { model: config.chairman_model.clone(), response, contract_eval: eval, repaired }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_adds_ellipsis_only_when_needed() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcde…");
    }
}
