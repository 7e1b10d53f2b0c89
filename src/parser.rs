use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Replace the various non-breaking/thin space glyphs with a normal space,
/// then collapse whitespace runs and trim.
pub fn normalize_ws(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| match c {
            '\u{00a0}' | '\u{202f}' | '\u{2007}' => ' ',
            other => other,
        })
        .collect();
    WS_RUN_RE.replace_all(&replaced, " ").trim().to_string()
}

static WS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9_\-]*\n(.*)\n?```\s*$").unwrap());

/// Strip a leading/trailing triple-backtick fence and stray quote/backtick
/// characters from the ends of a judge or chairman response.
pub fn strip_wrappers(text: &str) -> String {
    let t = text.trim();
    let unfenced = if let Some(caps) = CODE_FENCE_RE.captures(t) {
        caps.get(1).unwrap().as_str().to_string()
    } else {
        t.to_string()
    };
    unfenced
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'')
        .trim()
        .to_string()
}

static NARRATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(i am currently|i'm currently|i will now|i am now|i just|hit a snag|assessing the conundrum|interpreting the context|initiating the analysis|my focus is|the plan is|(?:i am|i'm) going to|(?:i have|i've) just|(?:i have|i've) finished|just finished|(?:i have|i've) hit|(?:i am|i'm) grappling|(?:i am|i'm) considering|(?:i am|i'm) deciding|(?:i have|i've) decided|finalizing the strategy|processing the parameters)\b",
    )
    .unwrap()
});

/// True if `text` reads like first-person narration of the model's own
/// process rather than a direct answer.
pub fn contains_process_narration(text: &str) -> bool {
    NARRATION_RE.is_match(text)
}

static ARROW_GLYPHS: &[char] = &['→', '⇒', '›', '»'];

fn normalize_arrows(s: &str) -> String {
    let mut out = s.replace("->", ">");
    for c in ARROW_GLYPHS {
        out = out.replace(*c, ">");
    }
    out
}

static FINAL_RANKING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFINAL_RANKING\s*:\s*").unwrap());

/// Scan lines in reverse for the last `FINAL_RANKING: ...` line and return
/// everything from that match onward.
pub fn extract_final_ranking_line(text: &str) -> Option<String> {
    let stripped = strip_wrappers(text);
    for line in stripped.lines().map(normalize_ws).collect::<Vec<_>>().into_iter().rev() {
        if let Some(m) = FINAL_RANKING_RE.find(&line) {
            return Some(line[m.start()..].to_string());
        }
    }
    None
}

static FULL_CHAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Response\s*[A-Z]\s*(?:>\s*Response\s*[A-Z]\s*){2,}").unwrap());
static LETTERS_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-D](\s*>\s*[A-D]){2,}").unwrap());

/// Recover a ranking chain from noisy text: try the full `Response X > Response Y`
/// pattern (last match wins), then fall back to a bare-letters chain.
pub fn extract_fuzzy_ranking_chain(text: &str) -> Option<String> {
    let normalized = normalize_arrows(&strip_wrappers(text));
    if let Some(m) = FULL_CHAIN_RE.find_iter(&normalized).last() {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = LETTERS_ONLY_RE.find(&normalized) {
        let letters: Vec<&str> = m.as_str().split('>').map(str::trim).collect();
        let rebuilt = letters.iter().map(|l| format!("Response {l}")).collect::<Vec<_>>().join(" > ");
        return Some(rebuilt);
    }
    None
}

fn norm_label(raw: &str) -> Option<String> {
    let t = raw.trim();
    static RESPONSE_LABEL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^response\s*([A-Za-z])$").unwrap());
    if let Some(caps) = RESPONSE_LABEL_RE.captures(t) {
        return Some(format!("Response {}", caps.get(1).unwrap().as_str().to_uppercase()));
    }
    if t.len() == 1 && t.chars().next().unwrap().is_ascii_alphabetic() {
        return Some(format!("Response {}", t.to_uppercase()));
    }
    None
}

pub fn dedupe_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Parse a ranking chain like `Response B > Response A > Response C` into
/// ordered labels, validating against `allowed_labels` when given.
pub fn parse_ranking_order(text: &str, allowed_labels: Option<&[String]>) -> Vec<String> {
    let parsed = parse_ranking_strict(text).or_else(|| {
        extract_fuzzy_ranking_chain(text).and_then(|chain| parse_ranking_strict(&chain))
    });
    let Some(labels) = parsed else { return Vec::new() };
    let labels = dedupe_preserve_order(labels);
    if let Some(allowed) = allowed_labels {
        let allowed_set: HashSet<&String> = allowed.iter().collect();
        let parsed_set: HashSet<&String> = labels.iter().collect();
        if allowed_set != parsed_set {
            return Vec::new();
        }
    }
    labels
}

fn parse_ranking_strict(text: &str) -> Option<Vec<String>> {
    let normalized = normalize_arrows(text);
    let candidate = extract_final_ranking_line(&normalized).unwrap_or(normalized);
    let after_colon = FINAL_RANKING_RE.find(&candidate).map(|m| &candidate[m.end()..]).unwrap_or(&candidate);
    let labels: Vec<String> = after_colon
        .split('>')
        .filter_map(|part| norm_label(part.trim()))
        .collect();
    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

/// Parse the full ranking from arbitrary judge output (not already isolated
/// to a FINAL_RANKING line).
pub fn parse_ranking_from_text(text: &str, allowed_labels: Option<&[String]>) -> Vec<String> {
    parse_ranking_order(text, allowed_labels)
}

static EVID_STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "to", "of", "in", "on", "for", "with", "without", "by",
        "as", "is", "are", "was", "were", "be", "been", "being", "this", "that", "it", "its",
        "i", "you", "we", "they", "he", "she", "them", "us", "our", "your", "their", "from",
        "into", "over", "under", "then", "than", "if", "else", "when", "while", "do", "does",
        "did", "done", "can", "could", "should", "would", "may", "might", "must", "will", "just",
    ]
    .into_iter()
    .collect()
});

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]{5,}").unwrap());

fn evidence_tokens(s: &str) -> HashSet<String> {
    TOKEN_RE
        .find_iter(s)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| !EVID_STOPWORDS.contains(t.as_str()))
        .collect()
}

/// True if `line` shares a non-stopword token with `response_text`, or the
/// response is short enough that evidence can't reasonably be demanded.
pub fn evidence_ok(line: &str, response_text: &str) -> bool {
    if response_text.len() < 20 {
        return true;
    }
    !evidence_tokens(line).is_disjoint(&evidence_tokens(response_text))
}

/// True if a critique line is the canned placeholder rather than real content.
pub fn critique_is_placeholder(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.to_lowercase().contains("insufficient signal in text")
}

static CRITIQUE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*]\s*)?(?:Response\s*)?([A-Za-z])\s*(?:[:\-\u{2013}\u{2014}.]|\))\s*(.+)$").unwrap());

/// Extract the per-label critique line for `label` (a single letter) from
/// judge output text, if present.
fn find_critique_line(text: &str, letter: &str) -> Option<String> {
    for caps in CRITIQUE_LINE_RE.captures_iter(text) {
        let cap_letter = caps.get(1).unwrap().as_str();
        if cap_letter.eq_ignore_ascii_case(letter) {
            return Some(caps.get(2).unwrap().as_str().trim().to_string());
        }
    }
    None
}

/// Canonical placeholder critique used when a judge omitted a label.
pub fn placeholder_critique() -> &'static str {
    "Strength: None; Flaw: Insufficient signal in text."
}

/// Build one critique line per label (in `labels` order) from arbitrary
/// judge output text, falling back to the canned placeholder when a label's
/// line is missing or malformed.
pub fn critique_lines(text: &str, labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .map(|l| l.trim_start_matches("Response ").trim().to_string())
        .map(|letter| {
            let line = find_critique_line(text, &letter)
                .filter(|l| l.to_lowercase().contains("strength:") && l.to_lowercase().contains("flaw:"))
                .unwrap_or_else(|| placeholder_critique().to_string());
            format!("{letter}: {line}")
        })
        .collect()
}

/// Complete a raw parsed ranking order to exactly the given label set by
/// appending any missing labels in canonical order. Returns `None` if the
/// order still doesn't resolve to exactly that set (e.g. it names a label
/// outside the candidate set), or if the raw order was empty.
pub fn complete_ranking_order(order: Vec<String>, labels: &[String]) -> Option<Vec<String>> {
    if order.is_empty() {
        return None;
    }
    let mut order = order;
    let present: HashSet<String> = order.iter().cloned().collect();
    for label in labels {
        if !present.contains(label) {
            order.push(label.clone());
        }
    }
    let order_set: HashSet<&String> = order.iter().collect();
    let labels_set: HashSet<&String> = labels.iter().collect();
    if order_set == labels_set {
        Some(order)
    } else {
        None
    }
}

/// Join a completed ranking order and its critique lines into the canonical
/// 5-line block.
pub fn canonicalize_stage2(order: &[String], critiques: &[String]) -> String {
    let ranking_line = format!("FINAL_RANKING: {}", order.join(" > "));
    let mut out = critiques.to_vec();
    out.push(ranking_line);
    out.join("\n")
}

/// Coerce arbitrary judge output into the canonical 5-line format: one
/// critique line per label (in `labels` order) followed by `FINAL_RANKING`.
/// Returns an empty string if the ranking can't be completed to exactly the
/// given label set.
pub fn coerce_stage2_5line(text: &str, labels: &[String]) -> String {
    let critiques = critique_lines(text, labels);
    let order = parse_ranking_order(text, None);
    match complete_ranking_order(order, labels) {
        Some(completed) => canonicalize_stage2(&completed, &critiques),
        None => String::new(),
    }
}

/// Example ranking order shown to judges in the prompt. Deliberately not
/// `A > B > C > D` to avoid anchoring judges on alphabetical order.
pub fn example_ranking(labels: &[String]) -> String {
    if labels.len() == 4 {
        format!("{} > {} > {} > {}", labels[1], labels[2], labels[0], labels[3])
    } else if labels.len() > 1 {
        let rotated: Vec<String> = labels[1..].iter().chain(labels[..1].iter()).cloned().collect();
        rotated.join(" > ")
    } else {
        labels.join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ws_collapses_and_replaces_nbsp() {
        assert_eq!(normalize_ws("a\u{00a0}\u{00a0}b   c"), "a b c");
    }

    #[test]
    fn strip_wrappers_removes_code_fence() {
        assert_eq!(strip_wrappers("```\nhello\n```"), "hello");
        assert_eq!(strip_wrappers("```text\nhello\n```"), "hello");
    }

    #[test]
    fn extract_final_ranking_picks_last_match() {
        let text = "scratch: FINAL_RANKING: Response A > Response B\nsomething else\nFINAL_RANKING: Response B > Response A";
        assert_eq!(
            extract_final_ranking_line(text).unwrap(),
            "FINAL_RANKING: Response B > Response A"
        );
    }

    #[test]
    fn fuzzy_chain_recovers_bare_letters() {
        let chain = extract_fuzzy_ranking_chain("my pick: B > A > C > D").unwrap();
        assert_eq!(chain, "Response B > Response A > Response C > Response D");
    }

    #[test]
    fn parse_ranking_rejects_mismatched_label_set() {
        let labels = vec!["Response A".to_string(), "Response B".to_string()];
        let out = parse_ranking_order("FINAL_RANKING: Response A > Response C", Some(&labels));
        assert!(out.is_empty());
    }

    #[test]
    fn evidence_ok_short_response_always_passes() {
        assert!(evidence_ok("totally unrelated critique", "short"));
    }

    #[test]
    fn evidence_ok_requires_shared_token() {
        let response = "The quantum entanglement protocol failed during synchronization.";
        assert!(evidence_ok("Flaw: the synchronization step was broken", response));
        assert!(!evidence_ok("Strength: None; Flaw: generic answer with no overlap here", response));
    }

    #[test]
    fn example_ranking_avoids_alphabetical_anchor() {
        let labels: Vec<String> = ["Response A", "Response B", "Response C", "Response D"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(example_ranking(&labels), "Response B > Response C > Response A > Response D");
    }

    #[test]
    fn coerce_completes_missing_labels() {
        let labels: Vec<String> = ["Response A", "Response B", "Response C", "Response D"]
            .into_iter()
            .map(String::from)
            .collect();
        let raw = "A: Strength: clear; Flaw: terse.\nB: Strength: thorough; Flaw: verbose.\nFINAL_RANKING: Response B > Response A";
        let out = coerce_stage2_5line(raw, &labels);
        assert!(out.contains("FINAL_RANKING: Response B > Response A > Response C > Response D"));
        assert_eq!(out.lines().count(), 5);
    }

    #[test]
    fn coerce_fails_on_unresolvable_ranking() {
        let labels: Vec<String> = ["Response A", "Response B"].into_iter().map(String::from).collect();
        let out = coerce_stage2_5line("no ranking signal here at all", &labels);
        assert!(out.is_empty());
    }
}
