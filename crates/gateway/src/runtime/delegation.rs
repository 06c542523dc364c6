//! Delegation — running another agent as a tool.
//!
//! `list_custom_agents` ranks the configured agents (plus any connectors
//! demoted to virtual agents) for the current task; `run_public_agent`
//! spawns a bounded sub-engine with delegation disabled and converts its
//! answer into citeable agent-sourced fragments.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use cairn_domain::fragment::{Citation, Fragment, SourceApp};

use super::events::ChatEvent;
use super::mcp_agent::execute_mcp_agent;
use super::registry::build_catalog;
use super::run::AgentRun;
use super::selector::{rank_agents, AgentBrief};
use super::turn::{drive_run_owned, RunContext};

/// Execute `list_custom_agents`: rank all delegation candidates for the
/// query and return the catalog the model will pick from.
pub async fn list_custom_agents(ctx: &RunContext, run: &AgentRun, arguments: &Value) -> Value {
    let query = arguments
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or(&run.question);

    let mut briefs: Vec<AgentBrief> = ctx
        .state
        .config
        .agents
        .iter()
        .map(|(id, cfg)| AgentBrief::from_config(id, cfg))
        .collect();
    for va in &ctx.catalog.virtual_agents {
        briefs.push(AgentBrief {
            agent_id: va.agent_id.clone(),
            brief: format!("MCP connector {} exposing {} tools", va.name, va.tool_count),
            resources: vec![],
        });
    }
    briefs.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

    let ranked = rank_agents(ctx.state.llm.for_role("fast"), query, &briefs).await;

    let agents: Vec<Value> = ranked
        .iter()
        .map(|(id, score)| {
            let description = briefs
                .iter()
                .find(|b| b.agent_id == *id)
                .map(|b| b.brief.clone())
                .unwrap_or_default();
            json!({ "id": id, "score": score, "description": description })
        })
        .collect();

    json!({ "agents": agents, "count": agents.len() })
}

/// Execute `run_public_agent`.
///
/// Allowed only once ambiguity is resolved and only for agents surfaced
/// by the most recent `list_custom_agents` call. The sub-run reuses the
/// engine with `delegation_enabled = false`, a bounded turn budget, and
/// the parent's cancel token.
pub async fn run_public_agent(
    ctx: &RunContext,
    run: &mut AgentRun,
    arguments: &Value,
) -> Result<Value, String> {
    let agent_id = arguments
        .get("agentId")
        .and_then(|v| v.as_str())
        .ok_or("run_public_agent: missing 'agentId'")?
        .to_string();
    let query = arguments
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or("run_public_agent: missing 'query'")?
        .to_string();

    if !run.delegation_enabled {
        return Err("delegation is disabled for this run".into());
    }
    if !run.ambiguity_resolved {
        return Err(
            "delegation requires ambiguity to be resolved; gather more or clarify first".into(),
        );
    }
    if !run.available_agents.iter().any(|a| *a == agent_id) {
        return Err(format!(
            "agent '{agent_id}' was not surfaced by list_custom_agents; call it first"
        ));
    }

    // Virtual MCP agents route to the connector runtime instead of a
    // full sub-engine.
    if let Some(va) = ctx
        .catalog
        .virtual_agents
        .iter()
        .find(|v| v.agent_id == agent_id)
    {
        let text = execute_mcp_agent(
            &ctx.mcp,
            ctx.state.llm.for_role("fast"),
            &va.connector_id,
            &va.name,
            &query,
            ctx.state.config.engine.mcp_select_max,
        )
        .await?;
        let fragment = agent_fragment(&agent_id, &va.name, run.turn_count, 0, &text, SourceApp::Mcp);
        return Ok(json!({ "data": [fragment] }));
    }

    let agent_cfg = ctx
        .state
        .config
        .agents
        .get(&agent_id)
        .ok_or_else(|| format!("agent '{agent_id}' is not configured"))?
        .clone();

    tracing::info!(
        chat_id = %run.chat_id,
        agent_id = %agent_id,
        parent_turn = run.turn_count,
        "delegating to sub-agent"
    );

    // Build the sub-run: same chat, the agent's own prompt and app
    // restrictions, no further delegation, bounded turns.
    let sub_catalog = build_catalog(
        &ctx.state.config,
        &super::registry::McpCatalog::default(),
        Some(&agent_cfg),
        false,
        &[],
    );
    let sub_ctx = RunContext {
        state: ctx.state.clone(),
        mcp: ctx.mcp.clone(),
        catalog: sub_catalog,
        agent_prompt: Some(agent_cfg.prompt.clone()),
        cancel: ctx.cancel.clone(),
    };

    let mut sub_run = AgentRun::new(
        run.chat_id.clone(),
        run.user_id.clone(),
        run.workspace_id.clone(),
        query.clone(),
        ctx.state.config.engine.delegation_max_turns.min(25),
    );
    sub_run.delegation_enabled = false;
    sub_run.ambiguity_resolved = true;
    sub_run.parent_turn = Some(run.turn_count);
    sub_run.model = run.model.clone();

    // The sub-run never streams to the client; its events are drained
    // and dropped.
    let (sub_tx, mut sub_rx) = mpsc::channel::<ChatEvent>(64);
    let drainer = tokio::spawn(async move { while sub_rx.recv().await.is_some() {} });

    let (outcome, sub_run) = drive_run_owned(sub_ctx, sub_run, sub_tx).await;
    drainer.abort();

    let outcome = outcome.map_err(|e| format!("sub-agent run failed: {e}"))?;

    // Charge the sub-run's spend to the parent.
    run.usage.add(&sub_run.usage);
    run.total_cost_usd += sub_run.total_cost_usd;
    run.total_latency_ms += sub_run.total_latency_ms;

    // Attribution: the agent's answer plus every fragment it cited.
    let parent_turn = run.turn_count;
    let mut fragments = vec![agent_fragment(
        &agent_id,
        &agent_cfg.name,
        parent_turn,
        0,
        &outcome.answer,
        SourceApp::Agent,
    )];
    for id in &outcome.cited_fragment_ids {
        if let Some(f) = sub_run.fragments.by_id(id) {
            fragments.push(f.clone());
        }
    }

    Ok(json!({ "data": fragments }))
}

fn agent_fragment(
    agent_id: &str,
    agent_name: &str,
    parent_turn: u32,
    seq: usize,
    text: &str,
    app: SourceApp,
) -> Fragment {
    Fragment {
        id: format!("agent-{agent_id}-t{parent_turn}-{seq}"),
        content: text.to_string(),
        source: Citation {
            doc_id: format!("agent-{agent_id}-t{parent_turn}"),
            title: format!("Answer from {agent_name}"),
            url: None,
            app,
            entity: Some(agent_name.to_string()),
            chunk_index: 0,
        },
        confidence: 0.9,
        images: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_fragment_is_citeable() {
        let f = agent_fragment("ckabc", "Finance Analyst", 2, 0, "the answer", SourceApp::Agent);
        assert_eq!(f.source.app, SourceApp::Agent);
        assert_eq!(f.source.entity.as_deref(), Some("Finance Analyst"));
        assert_eq!(f.id, "agent-ckabc-t2-0");
    }
}
