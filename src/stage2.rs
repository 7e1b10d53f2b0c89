use crate::model::{Message, Stage1Entry, Stage2Entry};
use crate::parser::{
    canonicalize_stage2, complete_ranking_order, contains_process_narration, critique_is_placeholder,
    critique_lines, evidence_ok, example_ranking, parse_ranking_order, placeholder_critique, strip_wrappers,
};
use crate::transport::{filter_provider_id, looks_like_provider_id, ChatClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id as TaskId, JoinSet};

async fn chat_with_google_retry(
    client: &dyn ChatClient,
    model: &str,
    messages: &[Message],
    temperature: f32,
) -> Result<String, crate::error::CouncilError> {
    let first = client.chat(model, messages, temperature).await;
    if first.is_err() && model.starts_with("google/") {
        tokio::time::sleep(Duration::from_millis(150)).await;
        return client.chat(model, messages, temperature).await;
    }
    first
}

fn stage2_system_message() -> &'static str {
    concat!(
        "STAGE 2 EVALUATION MODE.\n",
        "You are judging a set of anonymized candidate responses to the same prompt.\n",
        "You do not know which model produced which response; judge only the text.\n",
        "Output EXACTLY 5 lines, nothing before or after them:\n",
        "Response <letter>: Strength: <short phrase>; Flaw: <short phrase>\n",
        "(one such line per candidate, in candidate-letter order)\n",
        "FINAL_RANKING: <letter> > <letter> > <letter> > <letter>\n",
        "Every critique must reference something concrete from that response's text.\n",
        "Do not narrate your process. Do not add commentary outside the 5 lines.\n",
    )
}

fn stage2_repair_system_message() -> &'static str {
    concat!(
        "STAGE 2 REPAIR MODE.\n",
        "Your previous output could not be parsed.\n",
        "Output ONLY one line: FINAL_RANKING: <letter> > <letter> > <letter> > <letter>\n",
        "No other text.\n",
    )
}

fn base_messages(system: &str, user: &str) -> Vec<Message> {
    vec![Message::system(system), Message::user(user)]
}

/// A fully labeled candidate set for one Stage 2 round.
pub struct LabeledCandidates {
    pub labels: Vec<String>,
    pub label_to_model: BTreeMap<String, String>,
    pub responses_by_label: BTreeMap<String, String>,
}

pub fn label_responses(stage1_results: &[Stage1Entry]) -> LabeledCandidates {
    let mut labels = Vec::new();
    let mut label_to_model = BTreeMap::new();
    let mut responses_by_label = BTreeMap::new();
    for (i, entry) in stage1_results.iter().enumerate() {
        let letter = (b'A' + i as u8) as char;
        let label = format!("Response {letter}");
        label_to_model.insert(label.clone(), entry.model.clone());
        responses_by_label.insert(label.clone(), entry.response.clone());
        labels.push(label);
    }
    LabeledCandidates { labels, label_to_model, responses_by_label }
}

fn build_stage2_prompt(user_prompt: &str, candidates: &LabeledCandidates) -> String {
    let example_line = example_ranking(&candidates.labels);
    let rubric = concat!(
        "Judge each candidate on correctness, concreteness, and how well it actually answers the prompt.\n",
        "Penalize vague, generic, or evasive answers. Penalize process narration.\n",
        "Example (do not copy the order, only the format):\n",
    );
    let blocks: Vec<String> = candidates
        .labels
        .iter()
        .map(|l| format!("{l}:\n{}\n", candidates.responses_by_label.get(l).cloned().unwrap_or_default()))
        .collect();
    format!(
        "User prompt:\n{user_prompt}\n\n{rubric}FINAL_RANKING: {example_line}\n\nCandidates:\n{}",
        blocks.join("\n")
    )
}

fn canonical_default(order: &[String]) -> String {
    let critiques: Vec<String> = order
        .iter()
        .map(|l| format!("{}: {}", l.trim_start_matches("Response ").trim(), placeholder_critique()))
        .collect();
    format!("{}\nFINAL_RANKING: {}", critiques.join("\n"), order.join(" > "))
}

struct Acceptance {
    parsed: Option<Vec<String>>,
    canonical: String,
    partial: bool,
    reason: String,
}

fn classify_quality(
    canonical: &str,
    parsed: &[String],
    used_example: bool,
    responses_by_label: &BTreeMap<String, String>,
    evidence_min_lines: usize,
) -> (bool, String) {
    if canonical.is_empty() {
        return (true, "empty_canonical".to_string());
    }
    let lines: Vec<&str> = canonical.lines().collect();
    if lines.len() != 5 {
        return (true, "bad_line_count".to_string());
    }
    let critique_lines = &lines[..4];
    if critique_lines.iter().any(|l| {
        let lower = l.to_lowercase();
        !lower.contains("strength:") || !lower.contains("flaw:")
    }) {
        return (true, "missing_strength_flaw".to_string());
    }
    let placeholder_n = critique_lines.iter().filter(|l| critique_is_placeholder(l)).count();
    if placeholder_n >= 2 {
        return (true, "placeholder_critiques".to_string());
    }
    if used_example && placeholder_n > 0 {
        return (true, "example_order_and_placeholder".to_string());
    }
    if parsed.len() <= 1 {
        return (true, "weak_ranking_signal".to_string());
    }
    let mut ok_n = 0;
    for (i, label) in ["A", "B", "C", "D"].iter().enumerate() {
        if i >= critique_lines.len() {
            break;
        }
        let response_label = format!("Response {label}");
        let response_text = responses_by_label.get(&response_label).cloned().unwrap_or_default();
        if evidence_ok(critique_lines[i], &response_text) {
            ok_n += 1;
        }
    }
    if ok_n < evidence_min_lines {
        return (true, format!("missing_evidence_{ok_n}_of_4"));
    }
    (false, String::new())
}

fn acceptable(
    text: &str,
    labels: &[String],
    responses_by_label: &BTreeMap<String, String>,
    example_line: &str,
    evidence_min_lines: usize,
) -> Acceptance {
    let stripped = strip_wrappers(text);
    if stripped.is_empty() {
        return Acceptance { parsed: None, canonical: String::new(), partial: true, reason: "empty".to_string() };
    }
    if looks_like_provider_id(&stripped) {
        return Acceptance { parsed: None, canonical: String::new(), partial: true, reason: "provider_id".to_string() };
    }
    if contains_process_narration(&stripped) {
        return Acceptance {
            parsed: None,
            canonical: String::new(),
            partial: true,
            reason: "process_narration".to_string(),
        };
    }
    let raw_order = parse_ranking_order(&stripped, None);
    if raw_order.is_empty() {
        return Acceptance {
            parsed: None,
            canonical: String::new(),
            partial: true,
            reason: "no_ranking_signal".to_string(),
        };
    }
    let Some(completed_order) = complete_ranking_order(raw_order, labels) else {
        return Acceptance {
            parsed: None,
            canonical: String::new(),
            partial: true,
            reason: "bad_ranking_completion".to_string(),
        };
    };
    let critiques = critique_lines(&stripped, labels);
    let canonical = canonicalize_stage2(&completed_order, &critiques);
    if canonical.is_empty() {
        return Acceptance {
            parsed: None,
            canonical: String::new(),
            partial: true,
            reason: "cannot_canonicalize".to_string(),
        };
    }
    let used_example = canonical
        .lines()
        .last()
        .map(|l| l.trim_end() == format!("FINAL_RANKING: {example_line}"))
        .unwrap_or(false);
    let (partial, reason) =
        classify_quality(&canonical, &completed_order, used_example, responses_by_label, evidence_min_lines);
    Acceptance { parsed: Some(completed_order), canonical, partial, reason }
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip(client, base_prompt, candidates, example_line), fields(model))]
async fn run_one_judge(
    client: &dyn ChatClient,
    model: &str,
    base_prompt: &str,
    candidates: &LabeledCandidates,
    example_line: &str,
    evidence_min_lines: usize,
) -> Stage2Entry {
    tracing::Span::current().record("model", model);
    let sys = stage2_system_message();

    // A0
    let a0 = chat_with_google_retry(client, model, &base_messages(sys, base_prompt), 0.1).await;
    if let Ok(raw) = &a0 {
        let raw = filter_provider_id(raw);
        let acc = acceptable(&raw, &candidates.labels, &candidates.responses_by_label, example_line, evidence_min_lines);
        if acc.parsed.is_some() && !acc.canonical.is_empty() && !acc.partial {
            let coerced = acc.canonical != raw;
            return Stage2Entry {
                model: model.to_string(),
                raw_ranking: raw.clone(),
                canonical_ranking: acc.canonical,
                parsed_ranking: acc.parsed.unwrap(),
                partial: false,
                partial_reason: None,
                coerced,
                format_fix_used: false,
                synthetic: false,
                adjudicator: false,
            };
        }
        // A0' — evidence wrapper re-ask, only if A0 at least parsed something.
        if acc.parsed.is_some() {
            let wrapper = concat!(
                "OUTPUT EXACTLY 5 LINES.\n",
                "Each critique line MUST include BOTH 'Strength:' and 'Flaw:' and MUST reference one concrete detail from that response.\n",
                "Do NOT use 'Insufficient signal in text.' unless the response is empty or refuses to answer.\n\n",
            );
            let prompt = format!("{wrapper}{base_prompt}");
            if let Ok(raw_ev) = chat_with_google_retry(client, model, &base_messages(sys, &prompt), 0.2).await {
                let raw_ev = filter_provider_id(&raw_ev);
                let acc_ev = acceptable(&raw_ev, &candidates.labels, &candidates.responses_by_label, example_line, evidence_min_lines);
                if acc_ev.parsed.is_some() && !acc_ev.canonical.is_empty() {
                    return Stage2Entry {
                        model: model.to_string(),
                        raw_ranking: raw_ev,
                        canonical_ranking: acc_ev.canonical,
                        parsed_ranking: acc_ev.parsed.unwrap(),
                        partial: acc_ev.partial,
                        partial_reason: if acc_ev.partial { Some(acc_ev.reason) } else { None },
                        coerced: true,
                        format_fix_used: true,
                        synthetic: false,
                        adjudicator: false,
                    };
                }
            }
        }
    }

    // A1 — strict re-judge
    let strict = concat!(
        "STRICT MODE: do not copy the example order above. ",
        "Output EXACTLY the template: 4 'Strength/Flaw' lines then FINAL_RANKING.\n\n",
    );
    let prompt = format!("{strict}{base_prompt}");
    if let Ok(raw) = chat_with_google_retry(client, model, &base_messages(sys, &prompt), 0.0).await {
        let raw = filter_provider_id(&raw);
        let acc = acceptable(&raw, &candidates.labels, &candidates.responses_by_label, example_line, evidence_min_lines);
        if acc.parsed.is_some() && !acc.canonical.is_empty() {
            return Stage2Entry {
                model: model.to_string(),
                raw_ranking: raw,
                canonical_ranking: acc.canonical,
                parsed_ranking: acc.parsed.unwrap(),
                partial: acc.partial,
                partial_reason: if acc.partial { Some(acc.reason) } else { None },
                coerced: true,
                format_fix_used: true,
                synthetic: false,
                adjudicator: false,
            };
        }

        // A2 — ask the judge to rewrite its own (possibly malformed) output.
        let rewrite = format!(
            "Rewrite the following into EXACTLY the 5-line template (4 Strength/Flaw lines then FINAL_RANKING), fixing nothing else:\n\n{raw}"
        );
        if let Ok(raw2) = chat_with_google_retry(client, model, &base_messages(sys, &rewrite), 0.0).await {
            let raw2 = filter_provider_id(&raw2);
            let acc2 = acceptable(&raw2, &candidates.labels, &candidates.responses_by_label, example_line, evidence_min_lines);
            if acc2.parsed.is_some() && !acc2.canonical.is_empty() {
                return Stage2Entry {
                    model: model.to_string(),
                    raw_ranking: raw2,
                    canonical_ranking: acc2.canonical,
                    parsed_ranking: acc2.parsed.unwrap(),
                    partial: acc2.partial,
                    partial_reason: if acc2.partial { Some(acc2.reason) } else { None },
                    coerced: true,
                    format_fix_used: true,
                    synthetic: false,
                    adjudicator: false,
                };
            }
        }
    }

    // A3 — last resort, ranking only.
    let repair_prompt = format!(
        "Give ONLY your ranking of these candidates, nothing else:\n\n{base_prompt}"
    );
    if let Ok(raw3) =
        chat_with_google_retry(client, model, &base_messages(stage2_repair_system_message(), &repair_prompt), 0.0).await
    {
        let raw3 = filter_provider_id(&raw3);
        let acc3 = acceptable(&raw3, &candidates.labels, &candidates.responses_by_label, example_line, evidence_min_lines);
        if let Some(parsed) = acc3.parsed {
            if !acc3.canonical.is_empty() {
                return Stage2Entry {
                    model: model.to_string(),
                    raw_ranking: raw3,
                    canonical_ranking: acc3.canonical,
                    parsed_ranking: parsed,
                    partial: true,
                    partial_reason: Some(if acc3.reason.is_empty() {
                        "repair_only_ranking".to_string()
                    } else {
                        acc3.reason
                    }),
                    coerced: true,
                    format_fix_used: true,
                    synthetic: false,
                    adjudicator: false,
                };
            }
        }
    }

    tracing::warn!(model, "judge exhausted repair ladder, falling back to synthetic ranking");
    let order = candidates.labels.clone();
    Stage2Entry {
        model: model.to_string(),
        raw_ranking: String::new(),
        canonical_ranking: canonical_default(&order),
        parsed_ranking: order,
        partial: true,
        partial_reason: Some("stage2_failed_all_attempts".to_string()),
        coerced: true,
        format_fix_used: true,
        synthetic: true,
        adjudicator: false,
    }
}

fn top1_votes(entries: &[Stage2Entry]) -> BTreeMap<String, usize> {
    let mut votes = BTreeMap::new();
    for e in entries {
        if e.synthetic || e.partial {
            continue;
        }
        if let Some(top) = e.parsed_ranking.first() {
            *votes.entry(top.clone()).or_insert(0) += 1;
        }
    }
    votes
}

/// Run every judge model concurrently against the anonymized candidate set,
/// then run one adjudicator pass if the judges don't reach a plurality.
pub async fn collect_rankings(
    client: Arc<dyn ChatClient>,
    user_prompt: &str,
    stage1_results: &[Stage1Entry],
    config: &crate::config::CouncilConfig,
) -> (LabeledCandidates, Vec<Stage2Entry>, bool) {
    tracing::info!(judges = config.stage2_models.len(), "stage 2 ranking started");
    let candidates = label_responses(stage1_results);
    let example_line = example_ranking(&candidates.labels);
    let base_prompt = build_stage2_prompt(user_prompt, &candidates);

    let mut set: JoinSet<Stage2Entry> = JoinSet::new();
    let mut task_model_map: std::collections::HashMap<TaskId, String> = std::collections::HashMap::new();

    for model in &config.stage2_models {
        let client = Arc::clone(&client);
        let model = model.clone();
        let base_prompt = base_prompt.clone();
        let labels = candidates.labels.clone();
        let responses_by_label = candidates.responses_by_label.clone();
        let example_line = example_line.clone();
        let evidence_min_lines = config.evidence_min_lines;
        let model_for_map = model.clone();
        let handle = set.spawn(async move {
            let candidates = LabeledCandidates { labels, label_to_model: BTreeMap::new(), responses_by_label };
            run_one_judge(client.as_ref(), &model, &base_prompt, &candidates, &example_line, evidence_min_lines).await
        });
        task_model_map.insert(handle.id(), model_for_map);
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_id, entry)) => results.push(entry),
            Err(join_err) => {
                if let Some(model) = task_model_map.get(&join_err.id()) {
                    tracing::warn!(model, error = %join_err, "judge task panicked");
                    results.push(Stage2Entry {
                        model: model.clone(),
                        raw_ranking: String::new(),
                        canonical_ranking: canonical_default(&candidates.labels),
                        parsed_ranking: candidates.labels.clone(),
                        partial: true,
                        partial_reason: Some("stage2_panicked".to_string()),
                        coerced: true,
                        format_fix_used: true,
                        synthetic: true,
                        adjudicator: false,
                    });
                }
            }
        }
    }

    // preserve configured order
    let mut by_model: BTreeMap<String, Stage2Entry> = results.into_iter().map(|e| (e.model.clone(), e)).collect();
    let mut ordered: Vec<Stage2Entry> = Vec::with_capacity(config.stage2_models.len());
    for model in &config.stage2_models {
        if let Some(entry) = by_model.remove(model) {
            ordered.push(entry);
        }
    }

    let mut adjudicated = false;
    if config.adjudicate_enabled {
        let votes = top1_votes(&ordered);
        let vote_total: usize = votes.values().sum();
        if vote_total >= config.adjudicate_min_nonpartial && votes.len() >= 2 {
            let top_votes = votes.values().copied().max().unwrap_or(0);
            let required = if config.adjudicate_min_top1_votes > 0 {
                config.adjudicate_min_top1_votes
            } else if vote_total >= 4 {
                3
            } else {
                2
            };
            if top_votes < required {
                tracing::info!(top_votes, required, "judges failed to reach a plurality, invoking adjudicator");
                let mut adjudicator_model = config.adjudicator_model.clone();
                if config.stage2_models.contains(&adjudicator_model) {
                    for fallback in &config.adjudicator_fallbacks {
                        if !config.stage2_models.contains(fallback) {
                            adjudicator_model = fallback.clone();
                            break;
                        }
                    }
                }
                let mut disagreement: Vec<(String, usize)> = votes.into_iter().collect();
                disagreement.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                let summary = disagreement
                    .iter()
                    .map(|(label, count)| format!("{label}: {count} vote(s)"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let adjudicator_prompt = format!(
                    "The judges disagreed: {summary}.\nRe-evaluate independently.\n\n{base_prompt}"
                );
                let mut entry = run_one_judge(
                    client.as_ref(),
                    &adjudicator_model,
                    &adjudicator_prompt,
                    &candidates,
                    &example_line,
                    config.evidence_min_lines,
                )
                .await;
                entry.adjudicator = true;
                if config.stage2_models.contains(&adjudicator_model) {
                    entry.model = format!("{adjudicator_model} (adjudicator)");
                }
                ordered.push(entry);
                adjudicated = true;
            }
        }
    }

    tracing::info!(adjudicated, "stage 2 ranking finished");
    (candidates, ordered, adjudicated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top1_votes_ignores_partial_and_synthetic() {
        let entries = vec![
            Stage2Entry {
                model: "a".into(),
                raw_ranking: String::new(),
                canonical_ranking: String::new(),
                parsed_ranking: vec!["Response A".into()],
                partial: false,
                partial_reason: None,
                coerced: false,
                format_fix_used: false,
                synthetic: false,
                adjudicator: false,
            },
            Stage2Entry {
                model: "b".into(),
                raw_ranking: String::new(),
                canonical_ranking: String::new(),
                parsed_ranking: vec!["Response B".into()],
                partial: true,
                partial_reason: Some("x".into()),
                coerced: false,
                format_fix_used: false,
                synthetic: false,
                adjudicator: false,
            },
        ];
        let votes = top1_votes(&entries);
        assert_eq!(votes.get("Response A"), Some(&1));
        assert_eq!(votes.get("Response B"), None);
    }

    #[test]
    fn classify_quality_flags_missing_strength_flaw() {
        let canonical = "A: no keywords here\nB: Strength: x; Flaw: y\nC: Strength: x; Flaw: y\nD: Strength: x; Flaw: y\nFINAL_RANKING: Response A > Response B > Response C > Response D";
        let responses = BTreeMap::new();
        let (partial, reason) = classify_quality(canonical, &["Response A".to_string()], false, &responses, 3);
        assert!(partial);
        assert_eq!(reason, "missing_strength_flaw");
    }
}
