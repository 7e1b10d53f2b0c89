use crate::model::Message;

/// A persona assigned to a council member, selected by provider prefix.
#[derive(Debug, Clone, Copy)]
pub struct RoleSpec {
    pub name: &'static str,
    pub system: &'static str,
}

pub const DEFAULT_ROLE: RoleSpec = RoleSpec {
    name: "Generalist",
    system: concat!(
        "You are a strong, truth-first assistant.\n",
        "Be concise, precise, and practical.\n",
        "If information is missing, say what is missing and ask for it.\n",
        "Do not invent facts.\n",
    ),
};

const BUILDER: RoleSpec = RoleSpec {
    name: "Builder",
    system: concat!(
        "You are a pragmatic senior engineer.\n",
        "Prefer minimal, runnable fixes.\n",
        "When uncertain, state assumptions explicitly.\n",
        "Do not invent facts.\n",
    ),
};

const REVIEWER: RoleSpec = RoleSpec {
    name: "Reviewer",
    system: concat!(
        "You are a careful reviewer.\n",
        "Look for edge cases, missing steps, and correctness issues.\n",
        "Do not invent facts.\n",
    ),
};

const SYNTHESIZER: RoleSpec = RoleSpec {
    name: "Synthesizer",
    system: concat!(
        "You are an analytical synthesizer.\n",
        "Combine the best parts of different answers into one.\n",
        "Do not invent facts.\n",
    ),
};

const CONTRARIAN: RoleSpec = RoleSpec {
    name: "Contrarian",
    system: concat!(
        "You are a sharp contrarian reviewer.\n",
        "Stress-test assumptions and look for hidden failure modes.\n",
        "Do not invent facts.\n",
    ),
};

const PROVIDER_DEFAULT_ROLE: &[(&str, RoleSpec)] = &[
    ("openai/", BUILDER),
    ("anthropic/", REVIEWER),
    ("google/", SYNTHESIZER),
    ("x-ai/", CONTRARIAN),
];

/// Pick a persona by matching the model id's provider prefix, falling back
/// to the generalist role for anything unrecognized.
pub fn get_role_spec(model: &str) -> RoleSpec {
    let m = model.trim();
    for (prefix, role) in PROVIDER_DEFAULT_ROLE {
        if m.starts_with(prefix) {
            return *role;
        }
    }
    DEFAULT_ROLE
}

/// Assemble the full message list for one council member: contract system
/// messages, then the role persona (optionally extended), then the user turn.
pub fn build_messages_for_model(
    model: &str,
    user_prompt: &str,
    contract_system_messages: &[Message],
    extra_system: Option<&str>,
) -> Vec<Message> {
    let mut msgs = Vec::with_capacity(contract_system_messages.len() + 2);
    msgs.extend_from_slice(contract_system_messages);
    let role = get_role_spec(model);
    let sys = match extra_system {
        Some(extra) => format!("{}\n\n{}\n", role.system.trim_end(), extra.trim()),
        None => role.system.to_string(),
    };
    msgs.push(Message::system(sys));
    msgs.push(Message::user(user_prompt));
    msgs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_prefix_selects_persona() {
        assert_eq!(get_role_spec("openai/gpt-5.2").name, "Builder");
        assert_eq!(get_role_spec("anthropic/claude-opus-4.5").name, "Reviewer");
        assert_eq!(get_role_spec("google/gemini-3-pro-preview").name, "Synthesizer");
        assert_eq!(get_role_spec("x-ai/grok-4.1-fast").name, "Contrarian");
    }

    #[test]
    fn unknown_prefix_falls_back_to_generalist() {
        assert_eq!(get_role_spec("mistral/mixtral").name, "Generalist");
    }
}
