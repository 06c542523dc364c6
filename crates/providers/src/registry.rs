//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances, plus the
//! role table that maps engine roles (`planner`, `fast`, `synthesizer`)
//! to `"provider_id/model"` specs.

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use cairn_domain::config::LlmConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// A provider plus the model name the resolved role spec pinned, if any.
pub type ResolvedProvider = (Arc<dyn LlmProvider>, Option<String>);

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Providers that fail to initialize are logged and skipped rather
    /// than aborting startup.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        for pc in &config.providers {
            match OpenAiCompatProvider::from_config(pc, config.default_timeout_ms) {
                Ok(p) => {
                    tracing::info!(provider_id = %pc.id, "registered LLM provider");
                    providers.insert(pc.id.clone(), Arc::new(p));
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                }
            }
        }

        Self {
            providers,
            roles: config.roles.clone(),
        }
    }

    /// An empty registry for tests; populate with [`Self::insert`].
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    /// Register a provider instance directly (tests, custom adapters).
    pub fn insert(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    /// Assign a role to a `"provider_id/model"` spec.
    pub fn assign_role(&mut self, role: impl Into<String>, spec: impl Into<String>) {
        self.roles.insert(role.into(), spec.into());
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve a `"provider_id/model"` spec (model part optional).
    pub fn resolve_spec(&self, spec: &str) -> Option<ResolvedProvider> {
        let provider_id = spec.split('/').next().unwrap_or(spec);
        let provider = self.get(provider_id)?;
        let model = spec.split_once('/').map(|(_, m)| m.to_string());
        Some((provider, model))
    }

    /// Resolve a provider for the given role.
    ///
    /// Resolution order: the requested role, then `planner`, then any
    /// registered provider (lowest id first, so the pick is stable).
    pub fn for_role(&self, role: &str) -> Option<ResolvedProvider> {
        for candidate in [role, "planner"] {
            if let Some(spec) = self.roles.get(candidate) {
                if let Some(resolved) = self.resolve_spec(spec) {
                    return Some(resolved);
                }
            }
        }
        let mut ids: Vec<_> = self.providers.keys().collect();
        ids.sort();
        ids.first().map(|id| (self.providers[*id].clone(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn role_resolution_falls_back_to_planner_then_any() {
        let mut reg = ProviderRegistry::empty();
        reg.insert("a", Arc::new(MockProvider::new("a")));
        reg.insert("b", Arc::new(MockProvider::new("b")));
        reg.assign_role("planner", "b/model-x");

        let (p, model) = reg.for_role("fast").unwrap();
        assert_eq!(p.provider_id(), "b");
        assert_eq!(model.as_deref(), Some("model-x"));

        let mut bare = ProviderRegistry::empty();
        bare.insert("z", Arc::new(MockProvider::new("z")));
        bare.insert("a", Arc::new(MockProvider::new("a")));
        let (p, model) = bare.for_role("fast").unwrap();
        // Stable pick: lowest id.
        assert_eq!(p.provider_id(), "a");
        assert!(model.is_none());
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg = ProviderRegistry::empty();
        assert!(reg.for_role("planner").is_none());
        assert!(reg.is_empty());
    }
}
