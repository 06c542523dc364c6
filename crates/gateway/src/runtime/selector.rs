//! Agent selector — ranks candidate agents for a delegation task.
//!
//! LLM-first: the fast model returns a ranked JSON list. When it cannot
//! (no provider, bad JSON, null ranking), a token-overlap heuristic
//! scores the briefs instead, penalized by resource readiness.

use cairn_domain::config::{CustomAgentConfig, ResourceState};
use cairn_domain::tool::Message;
use cairn_providers::registry::ResolvedProvider;
use cairn_providers::{ChatRequest, LlmProvider};

use super::prompts::selector_prompt;

/// A candidate offered to the selector.
#[derive(Debug, Clone)]
pub struct AgentBrief {
    pub agent_id: String,
    pub brief: String,
    pub resources: Vec<ResourceState>,
}

impl AgentBrief {
    pub fn from_config(agent_id: &str, config: &CustomAgentConfig) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            brief: config.brief(),
            resources: config.resources.iter().map(|r| r.state).collect(),
        }
    }
}

/// Rank candidates for the query, best first. Always returns every
/// candidate (ranking, not filtering).
pub async fn rank_agents(
    provider: Option<ResolvedProvider>,
    query: &str,
    candidates: &[AgentBrief],
) -> Vec<(String, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    if let Some((provider, model)) = provider {
        let briefs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (c.agent_id.clone(), c.brief.clone()))
            .collect();
        let req = ChatRequest {
            messages: vec![Message::user(selector_prompt(query, &briefs))],
            temperature: Some(0.0),
            json_mode: true,
            model,
            ..Default::default()
        };
        match provider.chat(&req).await {
            Ok(resp) => {
                if let Some(ranked) = parse_ranking(&resp.content, candidates) {
                    return ranked;
                }
                tracing::debug!("selector returned no usable ranking, falling back to heuristic");
            }
            Err(e) => {
                tracing::warn!(error = %e, "agent selector call failed, using heuristic");
            }
        }
    }

    heuristic_rank(query, candidates)
}

/// Parse `{"ranking": [{"agentId", "score"}]}`; `null` ranking or ids the
/// caller never offered yield `None` entries are dropped.
fn parse_ranking(text: &str, candidates: &[AgentBrief]) -> Option<Vec<(String, f64)>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let v: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    let ranking = v.get("ranking")?;
    if ranking.is_null() {
        return None;
    }
    let entries = ranking.as_array()?;
    let ranked: Vec<(String, f64)> = entries
        .iter()
        .filter_map(|e| {
            let id = e.get("agentId")?.as_str()?;
            if !candidates.iter().any(|c| c.agent_id == id) {
                return None;
            }
            let score = e.get("score").and_then(|s| s.as_f64()).unwrap_or(0.5);
            Some((id.to_string(), score.clamp(0.0, 1.0)))
        })
        .collect();
    if ranked.is_empty() {
        None
    } else {
        Some(ranked)
    }
}

/// Token-overlap score between query and brief, minus 0.3 when any
/// required resource is missing, minus 0.15 when any is partial.
fn heuristic_rank(query: &str, candidates: &[AgentBrief]) -> Vec<(String, f64)> {
    let query_tokens = tokenize(query);
    let mut scored: Vec<(String, f64)> = candidates
        .iter()
        .map(|c| {
            let brief_tokens = tokenize(&c.brief);
            let overlap = query_tokens
                .iter()
                .filter(|t| brief_tokens.contains(*t))
                .count();
            let mut score = if query_tokens.is_empty() {
                0.0
            } else {
                overlap as f64 / query_tokens.len() as f64
            };
            if c.resources.iter().any(|r| *r == ResourceState::Missing) {
                score -= 0.3;
            } else if c.resources.iter().any(|r| *r == ResourceState::Partial) {
                score -= 0.15;
            }
            (c.agent_id.clone(), score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_providers::mock::{MockProvider, ScriptedResponse};
    use std::sync::Arc;

    fn brief(id: &str, text: &str, resources: Vec<ResourceState>) -> AgentBrief {
        AgentBrief {
            agent_id: id.into(),
            brief: text.into(),
            resources,
        }
    }

    #[tokio::test]
    async fn llm_ranking_wins_when_parseable() {
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_script(
            "fast",
            vec![ScriptedResponse::text(
                r#"{"ranking": [{"agentId": "b", "score": 0.9}, {"agentId": "a", "score": 0.4}]}"#,
            )],
        ));
        let candidates = vec![brief("a", "finance agent", vec![]), brief("b", "hr agent", vec![])];
        let ranked = rank_agents(Some((mock, None)), "hr question", &candidates).await;
        assert_eq!(ranked[0].0, "b");
        assert!((ranked[0].1 - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn null_ranking_falls_back_to_heuristic() {
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_script(
            "fast",
            vec![ScriptedResponse::text(r#"{"ranking": null}"#)],
        ));
        let candidates = vec![
            brief("finance", "analyzes finance spreadsheets budget", vec![]),
            brief("travel", "books travel itineraries", vec![]),
        ];
        let ranked = rank_agents(Some((mock, None)), "finance budget question", &candidates).await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "finance");
    }

    #[test]
    fn heuristic_penalizes_missing_and_partial_resources() {
        let candidates = vec![
            brief("ready", "finance budget analysis", vec![ResourceState::Ready]),
            brief("partial", "finance budget analysis", vec![ResourceState::Partial]),
            brief("missing", "finance budget analysis", vec![ResourceState::Missing]),
        ];
        let ranked = heuristic_rank("finance budget", &candidates);
        assert_eq!(ranked[0].0, "ready");
        assert_eq!(ranked[1].0, "partial");
        assert_eq!(ranked[2].0, "missing");
        assert!((ranked[0].1 - ranked[1].1 - 0.15).abs() < 1e-9);
        assert!((ranked[0].1 - ranked[2].1 - 0.3).abs() < 1e-9);
    }

    #[test]
    fn ranking_with_unknown_ids_is_rejected() {
        let candidates = vec![brief("a", "x", vec![])];
        assert!(parse_ranking(r#"{"ranking": [{"agentId": "ghost"}]}"#, &candidates).is_none());
    }
}
