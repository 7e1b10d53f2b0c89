use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single chat message in provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Result of running a response through the contract compliance checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEval {
    pub stage: String,
    pub status: ContractStatus,
    pub eligible: bool,
    pub hard_fail_reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub evaluated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractStatus {
    Pass,
    Warn,
    Fail,
}

/// One generator's Stage 1 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage1Entry {
    pub model: String,
    pub response: String,
    pub contract_eval: ContractEval,
    pub synthetic: bool,
    pub synthetic_reason: Option<String>,
}

/// A letter label (`Response A`, `Response B`, ...) assigned for anonymized
/// judging, in the order generators were configured.
pub type Label = String;

/// One judge's Stage 2 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage2Entry {
    pub model: String,
    pub raw_ranking: String,
    pub canonical_ranking: String,
    pub parsed_ranking: Vec<Label>,
    pub partial: bool,
    pub partial_reason: Option<String>,
    pub coerced: bool,
    pub format_fix_used: bool,
    pub synthetic: bool,
    pub adjudicator: bool,
}

/// Average-rank aggregate for one generator model across all judges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub model: String,
    pub label: Label,
    pub average_rank: f64,
    pub rankings_count: usize,
    pub disqualified: bool,
}

/// Sentinel rank given to a disqualified (contract-ineligible) model.
pub const RANK_DISQUALIFIED: f64 = 9998.0;
/// Sentinel rank given to a model that received no judge votes at all.
pub const RANK_UNRANKED: f64 = 9999.0;

/// Final chairman synthesis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage3Result {
    pub model: String,
    pub response: String,
    pub contract_eval: ContractEval,
    pub repaired: bool,
}

/// Request to run one full deliberation round.
#[derive(Debug, Clone, Deserialize)]
pub struct CouncilRequest {
    pub user_prompt: String,
    #[serde(default)]
    pub contract_stack: Option<String>,
}

/// Metadata attached to a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CouncilMeta {
    pub contract_stack: Vec<String>,
    pub label_to_model: BTreeMap<Label, String>,
    pub aggregate_rankings: Vec<Aggregate>,
    pub model_roles: Option<BTreeMap<String, String>>,
}

/// Full result of one deliberation round, as returned to a caller.
#[derive(Debug, Clone, Serialize)]
pub struct CouncilResult {
    pub stage1: Vec<Stage1Entry>,
    pub stage2: Vec<Stage2Entry>,
    pub stage3: Stage3Result,
    pub meta: CouncilMeta,
    pub timestamp: String,
}
