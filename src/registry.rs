//! Named agent registry (C6).
//!
//! A fixed, process-wide table of agent descriptors resolved once at
//! startup. Requesting a named agent overrides the conversation's system
//! prompt, tool set, model, and streaming behavior; client-supplied tools are
//! ignored once a named agent is in play (§4.2).

use std::collections::HashMap;
use std::sync::Arc;

/// Static configuration for one named agent.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub tool_names: Vec<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Whether this agent streams per-token deltas or replays a single
    /// non-streaming completion (§4.3). `code_review` prefers the latter —
    /// a diff is more useful reviewed whole than watched arrive token by
    /// token, and it's a case the spec calls out as reliability-preferring.
    pub streaming: bool,
}

/// Read-only lookup table, safe to clone cheaply and share via
/// [`crate::state::AppState`]. `order` preserves registration order — the
/// dispatch-miss message (§8 scenario 4) lists agents as registered, not
/// alphabetically.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<HashMap<String, AgentDescriptor>>,
    order: Arc<Vec<String>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<AgentDescriptor>) -> Self {
        let order = agents.iter().map(|a| a.name.clone()).collect();
        let map = agents.into_iter().map(|a| (a.name.clone(), a)).collect();
        Self { agents: Arc::new(map), order: Arc::new(order) }
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.get(name)
    }

    /// Names in registration order (not alphabetical — see the struct doc).
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

/// Builds the three agents shipped with the proxy. A deployment that wants a
/// different fixed set edits this function directly — the registry is
/// immutable after startup, not configuration-driven, per §4.2's "named
/// agents are code, not data" design note.
pub fn default_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor {
            name: "main".into(),
            system_prompt: "You are a helpful general-purpose assistant.".into(),
            model: None,
            tool_names: vec![
                "generateForm".into(),
                "generateChart".into(),
                "generateCode".into(),
                "generateCard".into(),
            ],
            max_tokens: None,
            temperature: None,
            streaming: true,
        },
        AgentDescriptor {
            name: "research".into(),
            system_prompt: "You are a careful research assistant. Cite your reasoning, \
                 prefer precise claims over speculation, and use the chart and card tools \
                 to present findings visually when it helps."
                .into(),
            model: None,
            tool_names: vec!["generateChart".into(), "generateCard".into()],
            max_tokens: None,
            temperature: Some(0.3),
            streaming: true,
        },
        AgentDescriptor {
            name: "code_review".into(),
            system_prompt: "You are a terse, precise code reviewer. Point out correctness \
                 and security issues first. Use the code tool to show suggested diffs."
                .into(),
            model: None,
            tool_names: vec!["generateCode".into()],
            max_tokens: None,
            temperature: Some(0.0),
            streaming: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agents_are_all_resolvable_by_name() {
        let registry = AgentRegistry::new(default_agents());
        assert!(registry.get("research").is_some());
        assert!(registry.get("code_review").is_some());
        assert!(registry.get("main").is_some());
    }

    #[test]
    fn unknown_agent_name_resolves_to_none() {
        let registry = AgentRegistry::new(default_agents());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn names_are_listed_in_registration_order_for_the_dispatch_miss_message() {
        let registry = AgentRegistry::new(default_agents());
        assert_eq!(registry.names(), vec!["main", "research", "code_review"]);
    }
}
