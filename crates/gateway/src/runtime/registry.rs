//! Tool registry — builds the catalog the model sees and dispatches the
//! retrieval tools.
//!
//! The catalog is rebuilt per run: built-ins filtered by connector sync
//! state and the agent's allowed apps, MCP tools filtered by the
//! request's `toolsList`, and a hard tool budget that re-classifies the
//! largest MCP connectors as virtual agents when exceeded.

use serde_json::{json, Value};

use cairn_domain::config::{Config, CustomAgentConfig};
use cairn_domain::fragment::SourceApp;
use cairn_domain::tool::ToolDefinition;

use super::run::AgentRun;
use super::tool_names;
use crate::stores::{SearchBackend, SearchRequest};

/// Default hit limit for search tools when the model does not pass one.
const DEFAULT_SEARCH_LIMIT: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot of the MCP tool surface for one run, decoupled from live
/// connections so the catalog logic is testable without processes.
#[derive(Debug, Clone, Default)]
pub struct McpCatalog {
    pub connectors: Vec<McpConnectorTools>,
}

#[derive(Debug, Clone)]
pub struct McpConnectorTools {
    pub connector_id: String,
    pub name: String,
    /// `(tool_name, description, input_schema)`.
    pub tools: Vec<(String, String, Value)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Builtin,
    Mcp {
        connector_id: String,
        tool_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub def: ToolDefinition,
    pub kind: ToolKind,
}

/// A connector demoted from direct tool exposure, reachable only through
/// `run_public_agent`.
#[derive(Debug, Clone)]
pub struct VirtualMcpAgent {
    /// Agent id used by `run_public_agent` (`mcp-{connector_id}`).
    pub agent_id: String,
    pub connector_id: String,
    pub name: String,
    pub tool_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    pub tools: Vec<ToolSpec>,
    pub virtual_agents: Vec<VirtualMcpAgent>,
}

impl ToolCatalog {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.def.clone()).collect()
    }

    pub fn spec(&self, tool_name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.def.name == tool_name)
    }

    pub fn schema_of(&self, tool_name: &str) -> Option<&Value> {
        self.spec(tool_name).map(|t| &t.def.parameters)
    }
}

/// The request's `toolsList` parameter: which MCP connector tools the
/// user enabled for this chat.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ToolsListEntry {
    #[serde(rename = "connectorId")]
    pub connector_id: String,
    /// External tool ids; empty = every tool of the connector.
    #[serde(default)]
    pub tools: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Access filter table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The app a built-in tool needs, if any.
pub fn required_app(tool_name: &str) -> Option<SourceApp> {
    match tool_name {
        tool_names::SEARCH_GMAIL => Some(SourceApp::Gmail),
        tool_names::SEARCH_DRIVE => Some(SourceApp::GoogleDrive),
        tool_names::SEARCH_CALENDAR => Some(SourceApp::GoogleCalendar),
        tool_names::SEARCH_CONTACTS => Some(SourceApp::GoogleWorkspace),
        tool_names::SEARCH_KNOWLEDGE_BASE => Some(SourceApp::KnowledgeBase),
        tool_names::SLACK_MESSAGES => Some(SourceApp::Slack),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn search_params(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": description },
            "excludedIds": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Document ids to exclude (already seen)"
            },
            "limit": { "type": "integer", "description": "Max results" }
        },
        "required": ["query"]
    })
}

fn builtin_tools(delegation_enabled: bool) -> Vec<ToolDefinition> {
    let mut defs = vec![
        ToolDefinition {
            name: tool_names::TODO_WRITE.into(),
            description: "Write or replace the run's plan: a goal and ordered sub-tasks."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "goal": { "type": "string" },
                    "subTasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "description": { "type": "string" },
                                "toolsRequired": {
                                    "type": "array",
                                    "items": { "type": "string" }
                                }
                            },
                            "required": ["description"]
                        }
                    }
                },
                "required": ["goal"]
            }),
        },
        ToolDefinition {
            name: tool_names::SYNTHESIZE_FINAL_ANSWER.into(),
            description: "Stream the final, cited answer to the user. Call exactly once, \
                          when the gathered evidence suffices."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "summaryHint": {
                        "type": "string",
                        "description": "Optional guidance on emphasis or structure"
                    }
                }
            }),
        },
        ToolDefinition {
            name: tool_names::SEARCH_GLOBAL.into(),
            description: "Search all synced enterprise content.".into(),
            parameters: search_params("Search query"),
        },
        ToolDefinition {
            name: tool_names::SEARCH_KNOWLEDGE_BASE.into(),
            description: "Search the curated knowledge base.".into(),
            parameters: search_params("Knowledge base query"),
        },
        ToolDefinition {
            name: tool_names::SEARCH_GMAIL.into(),
            description: "Search the user's Gmail messages.".into(),
            parameters: search_params("Email search query"),
        },
        ToolDefinition {
            name: tool_names::SEARCH_DRIVE.into(),
            description: "Search Google Drive files.".into(),
            parameters: search_params("Drive search query"),
        },
        ToolDefinition {
            name: tool_names::SEARCH_CALENDAR.into(),
            description: "Search Google Calendar events.".into(),
            parameters: search_params("Calendar search query"),
        },
        ToolDefinition {
            name: tool_names::SEARCH_CONTACTS.into(),
            description: "Search workspace contacts.".into(),
            parameters: search_params("Contact name or email"),
        },
        ToolDefinition {
            name: tool_names::SLACK_MESSAGES.into(),
            description: "Find Slack messages related to a topic.".into(),
            parameters: search_params("Topic or phrase"),
        },
        ToolDefinition {
            name: tool_names::FALL_BACK.into(),
            description: "Declare that no available tool can make progress, with a reason."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" }
                },
                "required": ["reason"]
            }),
        },
    ];

    if delegation_enabled {
        defs.push(ToolDefinition {
            name: tool_names::LIST_CUSTOM_AGENTS.into(),
            description: "List delegatable agents ranked for a task.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The task to rank agents for" }
                }
            }),
        });
        defs.push(ToolDefinition {
            name: tool_names::RUN_PUBLIC_AGENT.into(),
            description: "Delegate a task to an agent from list_custom_agents. Requires \
                          ambiguity to be resolved first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agentId": { "type": "string" },
                    "query": { "type": "string" }
                },
                "required": ["agentId", "query"]
            }),
        });
    }

    defs
}

/// Build the per-run tool catalog.
pub fn build_catalog(
    config: &Config,
    mcp: &McpCatalog,
    agent: Option<&CustomAgentConfig>,
    delegation_enabled: bool,
    tools_list: &[ToolsListEntry],
) -> ToolCatalog {
    let connectors = &config.connectors;

    // 1. Built-ins, filtered by connector sync state and agent app set.
    let mut tools: Vec<ToolSpec> = builtin_tools(delegation_enabled)
        .into_iter()
        .filter(|def| {
            let Some(app) = required_app(&def.name) else {
                return true;
            };
            if !connectors.is_synced(app) {
                return false;
            }
            match agent.and_then(|a| a.allowed_apps.as_ref()) {
                Some(allowed) => allowed.contains(&app),
                None => true,
            }
        })
        .map(|def| ToolSpec {
            def,
            kind: ToolKind::Builtin,
        })
        .collect();
    let internal_count = tools.len();

    // 2. MCP tools requested via toolsList.
    let mut selected: Vec<McpConnectorTools> = Vec::new();
    for entry in tools_list {
        let Some(connector) = mcp
            .connectors
            .iter()
            .find(|c| c.connector_id == entry.connector_id)
        else {
            tracing::warn!(connector_id = %entry.connector_id, "toolsList names unknown connector");
            continue;
        };
        let picked: Vec<_> = connector
            .tools
            .iter()
            .filter(|(name, _, _)| entry.tools.is_empty() || entry.tools.contains(name))
            .cloned()
            .collect();
        if !picked.is_empty() {
            selected.push(McpConnectorTools {
                connector_id: connector.connector_id.clone(),
                name: connector.name.clone(),
                tools: picked,
            });
        }
    }

    // 3. Budget: demote the largest connectors to virtual agents until
    //    the direct surface fits. Ties break on connector id, so the
    //    split is stable across runs.
    let budget = config.engine.tool_budget;
    let mut virtual_agents: Vec<VirtualMcpAgent> = Vec::new();
    let mut total = internal_count + selected.iter().map(|c| c.tools.len()).sum::<usize>();
    while total > budget && !selected.is_empty() {
        selected.sort_by(|a, b| {
            b.tools
                .len()
                .cmp(&a.tools.len())
                .then(a.connector_id.cmp(&b.connector_id))
        });
        let demoted = selected.remove(0);
        tracing::info!(
            connector_id = %demoted.connector_id,
            tool_count = demoted.tools.len(),
            "tool budget exceeded, exposing connector as virtual agent"
        );
        let tool_count = demoted.tools.len();
        total -= tool_count;
        virtual_agents.push(VirtualMcpAgent {
            agent_id: format!("mcp-{}", demoted.connector_id),
            connector_id: demoted.connector_id,
            name: demoted.name,
            tool_count,
        });
    }
    virtual_agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

    // 4. Materialize the surviving MCP tools.
    selected.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
    for connector in selected {
        for (name, description, schema) in connector.tools {
            tools.push(ToolSpec {
                def: ToolDefinition {
                    name: format!("{}__{}", connector.connector_id, name),
                    description: format!("[{}] {description}", connector.name),
                    parameters: schema,
                },
                kind: ToolKind::Mcp {
                    connector_id: connector.connector_id.clone(),
                    tool_name: name,
                },
            });
        }
    }

    if !virtual_agents.is_empty() && !delegation_enabled {
        tracing::warn!(
            demoted = virtual_agents.len(),
            "connectors demoted to virtual agents but delegation is disabled; they are unreachable this run"
        );
    }

    ToolCatalog {
        tools,
        virtual_agents,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute a built-in retrieval tool against the search backend.
///
/// Returns the raw result shape the post-hook expects (`{data: [...]}`)
/// or an error string.
pub async fn dispatch_search(
    search: &dyn SearchBackend,
    run: &AgentRun,
    tool_name: &str,
    arguments: &Value,
) -> Result<Value, String> {
    if tool_name == tool_names::FALL_BACK {
        let reason = arguments
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("unspecified");
        tracing::info!(chat_id = %run.chat_id, reason, "model invoked fall_back");
        return Ok(json!({ "data": [], "reason": reason }));
    }

    let query = arguments
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("{tool_name}: missing 'query' argument"))?;
    let excluded_ids = arguments
        .get("excludedIds")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let limit = arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_SEARCH_LIMIT);

    let app = match tool_name {
        tool_names::SEARCH_GLOBAL => None,
        other => required_app(other),
    };

    let fragments = search
        .search(SearchRequest {
            app,
            query: query.to_string(),
            excluded_ids,
            limit,
            user_id: run.user_id.clone(),
            workspace_id: run.workspace_id.clone(),
        })
        .await
        .map_err(|e| format!("{tool_name}: {e}"))?;

    Ok(json!({ "data": fragments }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_domain::config::ConnectorConfig;

    fn config_with(connectors: ConnectorConfig, budget: usize) -> Config {
        let mut config = Config::default();
        config.connectors = connectors;
        config.engine.tool_budget = budget;
        config
    }

    fn mcp_catalog(specs: &[(&str, usize)]) -> McpCatalog {
        McpCatalog {
            connectors: specs
                .iter()
                .map(|(id, n)| McpConnectorTools {
                    connector_id: id.to_string(),
                    name: id.to_uppercase(),
                    tools: (0..*n)
                        .map(|i| {
                            (
                                format!("tool{i}"),
                                format!("tool {i}"),
                                json!({"type": "object", "properties": {}}),
                            )
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn all_entries(catalog: &McpCatalog) -> Vec<ToolsListEntry> {
        catalog
            .connectors
            .iter()
            .map(|c| ToolsListEntry {
                connector_id: c.connector_id.clone(),
                tools: vec![],
            })
            .collect()
    }

    #[test]
    fn unsynced_connectors_hide_their_tools() {
        let config = config_with(ConnectorConfig::default(), 30);
        let catalog = build_catalog(&config, &McpCatalog::default(), None, true, &[]);
        let names: Vec<_> = catalog.tools.iter().map(|t| t.def.name.as_str()).collect();
        assert!(!names.contains(&tool_names::SEARCH_GMAIL));
        assert!(!names.contains(&tool_names::SLACK_MESSAGES));
        // No connector flag needed for the knowledge base or global search.
        assert!(names.contains(&tool_names::SEARCH_KNOWLEDGE_BASE));
        assert!(names.contains(&tool_names::SEARCH_GLOBAL));
        assert!(names.contains(&tool_names::RUN_PUBLIC_AGENT));
    }

    #[test]
    fn synced_connectors_expose_tools() {
        let connectors = ConnectorConfig {
            gmail_synced: true,
            slack_connected: true,
            ..Default::default()
        };
        let config = config_with(connectors, 30);
        let catalog = build_catalog(&config, &McpCatalog::default(), None, true, &[]);
        let names: Vec<_> = catalog.tools.iter().map(|t| t.def.name.as_str()).collect();
        assert!(names.contains(&tool_names::SEARCH_GMAIL));
        assert!(names.contains(&tool_names::SLACK_MESSAGES));
        assert!(!names.contains(&tool_names::SEARCH_DRIVE));
    }

    #[test]
    fn agent_app_restriction_removes_tools() {
        let connectors = ConnectorConfig {
            gmail_synced: true,
            google_drive_synced: true,
            ..Default::default()
        };
        let config = config_with(connectors, 30);
        let agent = CustomAgentConfig {
            name: "a".into(),
            description: "d".into(),
            prompt: "p".into(),
            capabilities: vec![],
            domains: vec![],
            allowed_apps: Some(vec![SourceApp::Gmail]),
            estimated_cost_usd: 0.0,
            resources: vec![],
        };
        let catalog = build_catalog(&config, &McpCatalog::default(), Some(&agent), false, &[]);
        let names: Vec<_> = catalog.tools.iter().map(|t| t.def.name.as_str()).collect();
        assert!(names.contains(&tool_names::SEARCH_GMAIL));
        assert!(!names.contains(&tool_names::SEARCH_DRIVE));
        assert!(!names.contains(&tool_names::SEARCH_KNOWLEDGE_BASE));
        assert!(!names.contains(&tool_names::LIST_CUSTOM_AGENTS));
    }

    #[test]
    fn delegation_disabled_hides_agent_tools() {
        let config = config_with(ConnectorConfig::default(), 30);
        let catalog = build_catalog(&config, &McpCatalog::default(), None, false, &[]);
        assert!(catalog.spec(tool_names::RUN_PUBLIC_AGENT).is_none());
        assert!(catalog.spec(tool_names::LIST_CUSTOM_AGENTS).is_none());
    }

    #[test]
    fn budget_demotes_largest_connector_first_deterministically() {
        let config = config_with(ConnectorConfig::default(), 30);
        // 7 internal tools survive the sync filter; 7 + 12 + 12 = 31 > 30.
        let mcp = mcp_catalog(&[("alpha", 12), ("beta", 12)]);
        let catalog = build_catalog(&config, &mcp, None, true, &all_entries(&mcp));

        // Equal sizes: the tie breaks on connector id, so "alpha" goes.
        assert_eq!(catalog.virtual_agents.len(), 1);
        assert_eq!(catalog.virtual_agents[0].agent_id, "mcp-alpha");
        let direct_mcp = catalog
            .tools
            .iter()
            .filter(|t| matches!(t.kind, ToolKind::Mcp { .. }))
            .count();
        assert_eq!(direct_mcp, 12);
        assert!(catalog.tools.len() <= 30);
    }

    #[test]
    fn budget_keeps_everything_when_it_fits() {
        let config = config_with(ConnectorConfig::default(), 30);
        let mcp = mcp_catalog(&[("alpha", 5)]);
        let catalog = build_catalog(&config, &mcp, None, true, &all_entries(&mcp));
        assert!(catalog.virtual_agents.is_empty());
        assert!(catalog
            .tools
            .iter()
            .any(|t| t.def.name == "alpha__tool0"));
    }

    #[test]
    fn tools_list_subsets_connector_tools() {
        let config = config_with(ConnectorConfig::default(), 30);
        let mcp = mcp_catalog(&[("alpha", 5)]);
        let entries = vec![ToolsListEntry {
            connector_id: "alpha".into(),
            tools: vec!["tool1".into(), "tool3".into()],
        }];
        let catalog = build_catalog(&config, &mcp, None, true, &entries);
        let mcp_names: Vec<_> = catalog
            .tools
            .iter()
            .filter(|t| matches!(t.kind, ToolKind::Mcp { .. }))
            .map(|t| t.def.name.as_str())
            .collect();
        assert_eq!(mcp_names, vec!["alpha__tool1", "alpha__tool3"]);
    }

    #[tokio::test]
    async fn dispatch_search_maps_apps_and_arguments() {
        use crate::stores::memory::MemorySearchBackend;
        use cairn_domain::fragment::{Citation, Fragment};

        let backend = MemorySearchBackend::new();
        backend.seed(vec![Fragment {
            id: "f1".into(),
            content: "budget numbers".into(),
            source: Citation {
                doc_id: "d1".into(),
                title: "Budget email".into(),
                url: None,
                app: SourceApp::Gmail,
                entity: None,
                chunk_index: 0,
            },
            confidence: 0.9,
            images: vec![],
        }]);
        let run = AgentRun::new("c", "u", "w", "q", 12);

        let raw = dispatch_search(
            &backend,
            &run,
            tool_names::SEARCH_GMAIL,
            &json!({"query": "budget"}),
        )
        .await
        .unwrap();
        assert_eq!(raw["data"].as_array().unwrap().len(), 1);

        // Drive search finds nothing (wrong app).
        let raw = dispatch_search(
            &backend,
            &run,
            tool_names::SEARCH_DRIVE,
            &json!({"query": "budget"}),
        )
        .await
        .unwrap();
        assert!(raw["data"].as_array().unwrap().is_empty());

        // Missing query is an execution error.
        assert!(
            dispatch_search(&backend, &run, tool_names::SEARCH_GMAIL, &json!({}))
                .await
                .is_err()
        );

        // fall_back always succeeds with empty data.
        let raw = dispatch_search(
            &backend,
            &run,
            tool_names::FALL_BACK,
            &json!({"reason": "nothing fits"}),
        )
        .await
        .unwrap();
        assert_eq!(raw["reason"], "nothing fits");
    }
}
