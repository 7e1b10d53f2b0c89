use crate::model::{ContractEval, ContractStatus, Message};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// A named system-prompt policy layered onto every council member.
#[derive(Debug, Clone)]
pub struct ContractSpec {
    pub contract_id: &'static str,
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub chairman_addendum: &'static str,
}

pub const FACTORY_TRUTH_V1: ContractSpec = ContractSpec {
    contract_id: "factory_truth_v1",
    name: "Factory Truth-First v1",
    system_prompt: concat!(
        "You are running inside a product-agnostic council factory.\n",
        "Factory Contract (must follow):\n",
        "1) Truth-first: prioritize what is most likely true about the user's real problem; state uncertainty explicitly.\n",
        "2) Separate facts from guesses: tag non-trivial claims as [Observed] / [Assumed] / [Inferred]; do not blur them.\n",
        "3) Ask at most 1 killer question only if it would materially change the recommendation; otherwise proceed with best-guess plus assumptions.\n",
        "4) Smallest valuable action: propose something testable with minimal build; avoid dependencies and platform thinking.\n",
        "5) One primary risk: name the single highest-risk failure mode and add one simple guardrail.\n",
        "6) One metric that matters: pick one leading indicator; define a clear pass/fail threshold.\n",
        "7) Design for the edge user: handle the most constrained path (low attention, low literacy, high stress) by default.\n",
        "8) Make it legible: include a short rationale and a clear next step; no jargon; no sprawling option lists.\n",
        "9) Creativity inside constraints: propose at most 2 options (Conservative baseline + Bold alternative), both testable.\n",
        "10) Synthesis discipline: do not introduce new mechanisms unless you label them [New Proposal] and explain why.\n",
    ),
    chairman_addendum: "",
};

pub const ELDERCARE_SAFETY_V1: ContractSpec = ContractSpec {
    contract_id: "eldercare_safety_v1",
    name: "Eldercare Safety v1",
    system_prompt: concat!(
        "Product Addendum (elder-care safety):\n",
        "- Do not provide medical diagnosis or dosing advice. Default to safe-hold instructions and escalation.\n",
        "- For scam-risk: prioritize immediate 'stop/hold' guidance; avoid asking for sensitive info.\n",
        "- For caregiver escalation: prioritize burnout controls (supports, batching, quiet hours) while preserving safety overrides.\n",
        "- Be explicit about consent/privacy when capturing audio; keep retention minimal.\n",
    ),
    chairman_addendum: "Chairman: keep the result minimal and safe; avoid compliance theater; prefer simple guardrails.\n",
};

fn registry() -> HashMap<&'static str, &'static ContractSpec> {
    let mut m = HashMap::new();
    m.insert(FACTORY_TRUTH_V1.contract_id, &FACTORY_TRUTH_V1);
    m.insert(ELDERCARE_SAFETY_V1.contract_id, &ELDERCARE_SAFETY_V1);
    m
}

pub fn get_contract(contract_id: &str) -> Option<ContractSpec> {
    registry().get(contract_id).map(|s| (*s).clone())
}

/// Resolve a comma-separated contract stack into an ordered, deduplicated id
/// list with the factory base contract always first (remove-and-prepend).
pub fn parse_contract_ids(contract_stack: Option<&str>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    if let Some(stack) = contract_stack {
        for c in stack.split(',') {
            let c = c.trim();
            if !c.is_empty() {
                ids.push(c.to_string());
            }
        }
    }
    let base = FACTORY_TRUTH_V1.contract_id;
    if !ids.iter().any(|c| c == base) {
        ids.insert(0, base.to_string());
    } else {
        let rest: Vec<String> = ids.into_iter().filter(|c| c != base).collect();
        ids = std::iter::once(base.to_string()).chain(rest).collect();
    }
    ids
}

pub fn build_contract_system_messages(contract_stack: Option<&str>) -> Vec<Message> {
    parse_contract_ids(contract_stack)
        .iter()
        .filter_map(|id| get_contract(id))
        .map(|spec| Message::system(spec.system_prompt))
        .collect()
}

pub fn build_chairman_contract_system_messages(contract_stack: Option<&str>) -> Vec<Message> {
    parse_contract_ids(contract_stack)
        .iter()
        .filter_map(|id| get_contract(id))
        .map(|spec| {
            let content = if spec.chairman_addendum.is_empty() {
                spec.system_prompt.to_string()
            } else {
                format!("{}\n{}", spec.system_prompt, spec.chairman_addendum)
            };
            Message::system(content)
        })
        .collect()
}

pub fn contract_summary(contract_stack: Option<&str>) -> String {
    let ids = parse_contract_ids(contract_stack);
    let parts: Vec<String> = ids
        .iter()
        .filter_map(|id| get_contract(id).map(|spec| format!("{id} ({})", spec.name)))
        .collect();
    format!("Contracts applied: {}", parts.join(" + "))
}

static TABLE_SEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\|\s*:?-{3,}:?\s*\||-{3,}\s*\|)").unwrap());
static GUARANTEE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(guarantee|100%|always works|cannot fail|will prevent|prevents all)\b").unwrap()
});
static ACCESSIBILITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(accessibility (service|api)|android accessibility)\b").unwrap());
static BACKGROUND_MONITORING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(background monitoring|always listening|listen 24/7|constant monitoring|monitor in the background)\b").unwrap()
});
static MEDICAL_DOSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(take|dose|dosing|administer)\b[^\n.]{0,80}\b(\d+(?:\.\d+)?\s*(mg|mcg|g|ml))\b").unwrap()
});
static DIAGNOSIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(diagnos(e|is)|you have|this means you have)\b").unwrap());

fn contains_markdown_table_early(text: &str, max_lines: usize) -> bool {
    let window: Vec<&str> = text
        .lines()
        .take(max_lines)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if window.len() < 2 {
        return false;
    }
    let has_pipe = window.iter().take(10).any(|l| l.contains('|'));
    let has_sep = window.iter().take(15).any(|l| TABLE_SEP_RE.is_match(l));
    has_pipe && has_sep
}

fn needs_rubric_table_first(user_prompt: &str) -> bool {
    let up = user_prompt.to_lowercase();
    up.contains("start with the rubric table") || up.contains("rubric table")
}

fn has_section_heading(text: &str, token: &str) -> bool {
    let t = text.to_lowercase();
    let token = token.to_lowercase();
    t.contains(&format!("## {token}"))
        || t.contains(&format!("{token})"))
        || t.contains(&format!("{token} -"))
        || t.contains(&format!("{token}:"))
}

fn detect_prohibited_claims(text: &str) -> Vec<(&'static str, String)> {
    let t = text.to_lowercase();
    let mut reasons = Vec::new();
    if GUARANTEE_RE.is_match(&t) {
        reasons.push(("guarantee", "Contains guarantee / absolute prevention language.".to_string()));
    }
    if ACCESSIBILITY_RE.is_match(&t) {
        reasons.push((
            "accessibility_automation",
            "Mentions Accessibility Service/API automation (disallowed).".to_string(),
        ));
    }
    if BACKGROUND_MONITORING_RE.is_match(&t) {
        reasons.push((
            "background_monitoring",
            "Mentions background/always-on monitoring (disallowed).".to_string(),
        ));
    }
    if MEDICAL_DOSING_RE.is_match(&t) {
        reasons.push((
            "medical_dosing",
            "Contains dosing-like instruction with a specific quantity (disallowed).".to_string(),
        ));
    }
    reasons
}

fn detect_soft_warnings(user_prompt: &str, text: &str, contract_stack: Option<&str>) -> Vec<String> {
    let mut warnings = Vec::new();
    let lower = text.to_lowercase();
    if !lower.contains("[observed]") && !lower.contains("[assumed]") && !lower.contains("[inferred]") {
        warnings.push(
            "No [Observed]/[Assumed]/[Inferred] tags detected; contract prefers explicit uncertainty tagging."
                .to_string(),
        );
    }
    if needs_rubric_table_first(user_prompt) {
        let missing: Vec<&str> = ["b", "c", "d", "e", "f"]
            .into_iter()
            .filter(|sec| !has_section_heading(text, sec))
            .collect();
        if !missing.is_empty() {
            let upper: Vec<String> = missing.iter().map(|s| s.to_uppercase()).collect();
            warnings.push(format!("Missing expected sections: {} (protocol B-F).", upper.join(", ")));
        }
    }
    if contract_stack.map(|s| s.contains("eldercare_safety_v1")).unwrap_or(false)
        && DIAGNOSIS_RE.is_match(&lower)
    {
        warnings.push("Possible medical-diagnosis phrasing detected; prefer safe-hold plus escalation.".to_string());
    }
    warnings
}

/// Run the lightweight post-hoc compliance check against one response.
pub fn evaluate_contract_compliance(
    user_prompt: &str,
    response_text: &str,
    contract_stack: Option<&str>,
    stage: &str,
) -> ContractEval {
    let mut hard_fail_reasons = Vec::new();

    if needs_rubric_table_first(user_prompt) && !contains_markdown_table_early(response_text, 30) {
        hard_fail_reasons.push(
            "Requested 'Start with the rubric table' but no markdown table detected near the top."
                .to_string(),
        );
    }

    for (_, reason) in detect_prohibited_claims(response_text) {
        hard_fail_reasons.push(reason);
    }

    let warnings = detect_soft_warnings(user_prompt, response_text, contract_stack);

    let status = if !hard_fail_reasons.is_empty() {
        ContractStatus::Fail
    } else if !warnings.is_empty() {
        ContractStatus::Warn
    } else {
        ContractStatus::Pass
    };

    ContractEval {
        stage: stage.to_string(),
        eligible: status != ContractStatus::Fail,
        status,
        hard_fail_reasons,
        warnings,
        evaluated_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_contract_always_first() {
        let ids = parse_contract_ids(Some("eldercare_safety_v1"));
        assert_eq!(ids, vec!["factory_truth_v1", "eldercare_safety_v1"]);
    }

    #[test]
    fn base_contract_moved_to_front_when_present_later() {
        let ids = parse_contract_ids(Some("eldercare_safety_v1,factory_truth_v1"));
        assert_eq!(ids, vec!["factory_truth_v1", "eldercare_safety_v1"]);
    }

    #[test]
    fn empty_stack_still_has_base() {
        let ids = parse_contract_ids(None);
        assert_eq!(ids, vec!["factory_truth_v1"]);
    }

    #[test]
    fn idempotent_under_reapplication() {
        let once = parse_contract_ids(Some("eldercare_safety_v1"));
        let joined = once.join(",");
        let twice = parse_contract_ids(Some(&joined));
        assert_eq!(once, twice);
    }

    #[test]
    fn guarantee_language_hard_fails() {
        let eval = evaluate_contract_compliance("tell me about x", "this guarantee will always work", None, "stage1");
        assert_eq!(eval.status, ContractStatus::Fail);
        assert!(!eval.eligible);
    }

    #[test]
    fn dosing_instruction_hard_fails() {
        let eval = evaluate_contract_compliance("what should I do", "take 5 mg twice daily", None, "stage1");
        assert_eq!(eval.status, ContractStatus::Fail);
    }

    #[test]
    fn missing_tags_is_a_soft_warning() {
        let eval = evaluate_contract_compliance("explain this", "a plain untagged answer", None, "stage1");
        assert_eq!(eval.status, ContractStatus::Warn);
        assert!(eval.eligible);
    }

    #[test]
    fn tagged_clean_response_passes() {
        let eval = evaluate_contract_compliance("explain this", "[Observed] it works fine", None, "stage1");
        assert_eq!(eval.status, ContractStatus::Pass);
    }
}
