use crate::model::{Aggregate, Stage1Entry, Stage2Entry, RANK_DISQUALIFIED, RANK_UNRANKED};
use std::collections::{BTreeMap, BTreeSet};

/// Average the rank each generator model received across all non-partial
/// judges. Contract-ineligible generators never receive weight even if a
/// judge happened to rank them — they're pinned to a sentinel rank instead.
pub fn calculate_aggregate_rankings(
    stage2_results: &[Stage2Entry],
    label_to_model: &BTreeMap<String, String>,
    disqualified_models: &BTreeMap<String, Vec<String>>,
) -> Vec<Aggregate> {
    let mut rank_sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut rank_counts: BTreeMap<String, usize> = BTreeMap::new();

    for entry in stage2_results {
        if entry.synthetic || entry.partial {
            continue;
        }
        for (i, label) in entry.parsed_ranking.iter().enumerate() {
            let Some(model) = label_to_model.get(label) else { continue };
            if disqualified_models.contains_key(model) {
                continue;
            }
            *rank_sums.entry(model.clone()).or_insert(0.0) += (i + 1) as f64;
            *rank_counts.entry(model.clone()).or_insert(0) += 1;
        }
    }

    let mut aggregates = Vec::new();
    let mut seen = BTreeSet::new();

    for (label, model) in label_to_model {
        if let Some(&count) = rank_counts.get(model) {
            let sum = rank_sums.get(model).copied().unwrap_or(0.0);
            aggregates.push(Aggregate {
                model: model.clone(),
                label: label.clone(),
                average_rank: sum / count as f64,
                rankings_count: count,
                disqualified: false,
            });
            seen.insert(model.clone());
        }
    }

    for (model, _reasons) in disqualified_models {
        if seen.contains(model) {
            continue;
        }
        let label = label_to_model
            .iter()
            .find(|(_, m)| *m == model)
            .map(|(l, _)| l.clone())
            .unwrap_or_default();
        aggregates.push(Aggregate {
            model: model.clone(),
            label,
            average_rank: RANK_DISQUALIFIED,
            rankings_count: rank_counts.get(model).copied().unwrap_or(0),
            disqualified: true,
        });
        seen.insert(model.clone());
    }

    for (label, model) in label_to_model {
        if seen.contains(model) {
            continue;
        }
        aggregates.push(Aggregate {
            model: model.clone(),
            label: label.clone(),
            average_rank: RANK_UNRANKED,
            rankings_count: 0,
            disqualified: false,
        });
    }

    aggregates.sort_by(|a, b| {
        a.disqualified
            .cmp(&b.disqualified)
            .then(a.average_rank.partial_cmp(&b.average_rank).unwrap_or(std::cmp::Ordering::Equal))
    });
    aggregates
}

/// Build the `{model: [reasons]}` disqualification map from Stage 1 contract
/// evaluations, used as input to [`calculate_aggregate_rankings`].
pub fn disqualified_from_stage1(stage1: &[Stage1Entry]) -> BTreeMap<String, Vec<String>> {
    stage1
        .iter()
        .filter(|e| !e.contract_eval.eligible)
        .map(|e| (e.model.clone(), e.contract_eval.hard_fail_reasons.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContractEval, ContractStatus};

    fn entry(model: &str, eligible: bool) -> Stage1Entry {
        Stage1Entry {
            model: model.to_string(),
            response: "x".to_string(),
            contract_eval: ContractEval {
                stage: "stage1".to_string(),
                status: if eligible { ContractStatus::Pass } else { ContractStatus::Fail },
                eligible,
                hard_fail_reasons: if eligible { vec![] } else { vec!["bad".to_string()] },
                warnings: vec![],
                evaluated_at: "now".to_string(),
            },
            synthetic: false,
            synthetic_reason: None,
        }
    }

    fn stage2(model_label_order: Vec<&str>, partial: bool) -> Stage2Entry {
        Stage2Entry {
            model: "judge".to_string(),
            raw_ranking: String::new(),
            canonical_ranking: String::new(),
            parsed_ranking: model_label_order.into_iter().map(String::from).collect(),
            partial,
            partial_reason: None,
            coerced: false,
            format_fix_used: false,
            synthetic: false,
            adjudicator: false,
        }
    }

    #[test]
    fn disqualified_models_get_sentinel_rank_and_zero_weight() {
        let stage1 = vec![entry("openai/a", true), entry("anthropic/b", false)];
        let disq = disqualified_from_stage1(&stage1);
        let mut label_to_model = BTreeMap::new();
        label_to_model.insert("Response A".to_string(), "openai/a".to_string());
        label_to_model.insert("Response B".to_string(), "anthropic/b".to_string());

        let results = vec![stage2(vec!["Response B", "Response A"], false)];
        let aggregates = calculate_aggregate_rankings(&results, &label_to_model, &disq);

        let a = aggregates.iter().find(|a| a.model == "openai/a").unwrap();
        let b = aggregates.iter().find(|a| a.model == "anthropic/b").unwrap();
        assert!(b.disqualified);
        assert_eq!(b.average_rank, RANK_DISQUALIFIED);
        assert_eq!(a.average_rank, 1.0);
        // disqualified sorts after eligible models regardless of numeric rank
        assert!(aggregates.iter().position(|x| x.model == "openai/a").unwrap()
            < aggregates.iter().position(|x| x.model == "anthropic/b").unwrap());
    }

    #[test]
    fn unranked_model_gets_sentinel_rank() {
        let mut label_to_model = BTreeMap::new();
        label_to_model.insert("Response A".to_string(), "openai/a".to_string());
        label_to_model.insert("Response B".to_string(), "anthropic/b".to_string());
        let results = vec![stage2(vec!["Response A"], false)];
        let aggregates = calculate_aggregate_rankings(&results, &label_to_model, &BTreeMap::new());
        let b = aggregates.iter().find(|a| a.model == "anthropic/b").unwrap();
        assert_eq!(b.average_rank, RANK_UNRANKED);
    }

    #[test]
    fn partial_judge_entries_excluded() {
        let mut label_to_model = BTreeMap::new();
        label_to_model.insert("Response A".to_string(), "openai/a".to_string());
        let results = vec![stage2(vec!["Response A"], true)];
        let aggregates = calculate_aggregate_rankings(&results, &label_to_model, &BTreeMap::new());
        let a = aggregates.iter().find(|a| a.model == "openai/a").unwrap();
        assert_eq!(a.average_rank, RANK_UNRANKED);
    }
}
