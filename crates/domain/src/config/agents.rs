use serde::{Deserialize, Serialize};

use crate::fragment::SourceApp;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delegatable custom agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A pre-configured agent the engine can run as a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomAgentConfig {
    pub name: String,
    pub description: String,
    /// The agent's own system prompt, used by the delegated run.
    pub prompt: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    /// When set, restricts the apps whose tools the agent may use.
    #[serde(default)]
    pub allowed_apps: Option<Vec<SourceApp>>,
    /// Rough per-invocation cost shown to the selector.
    #[serde(default)]
    pub estimated_cost_usd: f64,
    /// Readiness of the resources the agent depends on.
    #[serde(default)]
    pub resources: Vec<ResourceReadiness>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadiness {
    pub name: String,
    pub state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Ready,
    Partial,
    Missing,
}

impl CustomAgentConfig {
    /// One-line brief handed to the agent selector.
    pub fn brief(&self) -> String {
        let readiness = if self.resources.is_empty() {
            "ready".to_string()
        } else {
            self.resources
                .iter()
                .map(|r| format!("{}:{:?}", r.name, r.state))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "{} — {} (capabilities: {}; domains: {}; est ${:.4}; resources: {})",
            self.name,
            self.description,
            self.capabilities.join("/"),
            self.domains.join("/"),
            self.estimated_cost_usd,
            readiness
        )
    }
}
