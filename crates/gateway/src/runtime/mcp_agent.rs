//! Virtual MCP agents.
//!
//! When the tool budget demotes a connector, its tools disappear from
//! the catalog and the connector is reachable only as an agent: the fast
//! model picks 1–N of its tools, which run in order and have their text
//! outputs concatenated.

use std::sync::Arc;

use serde_json::Value;

use cairn_domain::tool::Message;
use cairn_mcp_client::McpManager;
use cairn_providers::registry::ResolvedProvider;
use cairn_providers::{ChatRequest, LlmProvider};

use super::prompts::mcp_selection_prompt;

#[derive(Debug, Clone)]
struct ToolSelection {
    tool: String,
    arguments: Value,
}

/// Execute a demoted connector as a virtual agent.
pub async fn execute_mcp_agent(
    mcp: &Arc<McpManager>,
    selector: Option<ResolvedProvider>,
    connector_id: &str,
    connector_name: &str,
    query: &str,
    max_selections: usize,
) -> Result<String, String> {
    let connector = mcp
        .get(connector_id)
        .ok_or_else(|| format!("connector '{connector_id}' is not connected"))?;

    let tool_briefs: Vec<(String, String)> = connector
        .tools
        .iter()
        .map(|t| (t.name.clone(), t.description.clone()))
        .collect();
    if tool_briefs.is_empty() {
        return Err(format!("connector '{connector_id}' exposes no tools"));
    }

    let selections = select_tools(
        selector,
        query,
        connector_name,
        &tool_briefs,
        max_selections,
    )
    .await;

    let mut outputs: Vec<String> = Vec::new();
    for selection in selections {
        match mcp
            .call_tool(connector_id, &selection.tool, selection.arguments.clone())
            .await
        {
            Ok(result) => {
                let text = result.text();
                if result.is_error {
                    tracing::warn!(
                        connector_id,
                        tool = %selection.tool,
                        "MCP tool reported an error result"
                    );
                    outputs.push(format!("[{} error] {text}", selection.tool));
                } else {
                    outputs.push(text);
                }
            }
            Err(e) => return Err(format!("{}: {e}", selection.tool)),
        }
    }

    Ok(outputs.join("\n\n"))
}

/// Ask the fast model which tools to run. Falls back to the first tool
/// with the query as its only argument.
async fn select_tools(
    provider: Option<ResolvedProvider>,
    query: &str,
    connector_name: &str,
    tools: &[(String, String)],
    max: usize,
) -> Vec<ToolSelection> {
    let fallback = || {
        vec![ToolSelection {
            tool: tools[0].0.clone(),
            arguments: serde_json::json!({ "query": query }),
        }]
    };

    let Some((provider, model)) = provider else {
        return fallback();
    };

    let req = ChatRequest {
        messages: vec![Message::user(mcp_selection_prompt(
            query,
            connector_name,
            tools,
            max,
        ))],
        temperature: Some(0.0),
        json_mode: true,
        model,
        ..Default::default()
    };

    let content = match provider.chat(&req).await {
        Ok(resp) => resp.content,
        Err(e) => {
            tracing::warn!(error = %e, "MCP tool selection call failed, using first tool");
            return fallback();
        }
    };

    match parse_selections(&content, tools, max) {
        Some(selections) if !selections.is_empty() => selections,
        _ => fallback(),
    }
}

fn parse_selections(
    text: &str,
    tools: &[(String, String)],
    max: usize,
) -> Option<Vec<ToolSelection>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let v: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let entries = v.get("selections")?.as_array()?;
    let selections: Vec<ToolSelection> = entries
        .iter()
        .filter_map(|e| {
            let tool = e.get("tool")?.as_str()?.to_string();
            if !tools.iter().any(|(name, _)| *name == tool) {
                tracing::debug!(tool = %tool, "selection names unknown MCP tool, dropped");
                return None;
            }
            let arguments = e
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            Some(ToolSelection { tool, arguments })
        })
        .take(max)
        .collect();
    Some(selections)
}
