//! Pre- and post-execution hooks around every tool call.
//!
//! The pre-hook can veto execution (duplicates, exhausted failure
//! budgets) and augments search arguments with the run's seen-document
//! set. The post-hook turns raw tool output into ranked, deduplicated
//! fragments and the normalized envelope the model sees.

use chrono::{DateTime, Utc};
use serde_json::Value;

use cairn_domain::config::EngineConfig;
use cairn_domain::expectation::Expectation;
use cairn_domain::fragment::{scan_image_names, Fragment, FragmentImageReference};
use cairn_domain::tool::ToolEnvelope;
use cairn_domain::trace::{ToolExecutionRecord, ToolStatus};
use cairn_providers::registry::ResolvedProvider;

use super::fragments::ToolOutputSummary;
use super::plan::plan_from_args;
use super::ranker::rank_fragments;
use super::run::AgentRun;
use super::tool_names;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pre-execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Byte-identical successful call within the duplicate window.
    Duplicate,
    /// The tool exhausted its failure budget for this run.
    Blocked { failures: u32 },
}

#[derive(Debug, Clone)]
pub enum PreDecision {
    /// Execute with these (possibly augmented) arguments.
    Proceed(Value),
    Skip(SkipReason),
}

/// Run the pre-execution checks for one tool call.
pub fn pre_execute(
    run: &mut AgentRun,
    cfg: &EngineConfig,
    schema: Option<&Value>,
    tool_name: &str,
    arguments: &Value,
    now: DateTime<Utc>,
) -> PreDecision {
    // 1. Schema validation is advisory: log mismatches, never block.
    if let Some(schema) = schema {
        for problem in validate_against_schema(schema, arguments) {
            tracing::warn!(tool = tool_name, problem = %problem, "tool arguments fail declared schema");
        }
    }

    // 2. Duplicate suppression.
    if is_recent_duplicate(run, cfg, tool_name, arguments, now) {
        return PreDecision::Skip(SkipReason::Duplicate);
    }

    // 3. Failure budget.
    let failures = run.failures_of(tool_name);
    if failures >= cfg.failure_budget {
        return PreDecision::Skip(SkipReason::Blocked { failures });
    }

    // 4. excludedIds: union the model's exclusions into the seen set,
    //    then inject the full seen snapshot back into the arguments for
    //    tools that declare the field.
    let mut arguments = arguments.clone();
    if let Some(ids) = arguments.get("excludedIds").and_then(|v| v.as_array()) {
        let ids: Vec<String> = ids
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        run.fragments.exclude_documents(ids);
    }
    let declares_excluded = schema
        .and_then(|s| s.get("properties"))
        .map(|p| p.get("excludedIds").is_some())
        .unwrap_or(false);
    if declares_excluded {
        arguments["excludedIds"] = Value::Array(
            run.fragments
                .seen_snapshot()
                .into_iter()
                .map(Value::String)
                .collect(),
        );
    }

    PreDecision::Proceed(arguments)
}

fn is_recent_duplicate(
    run: &AgentRun,
    cfg: &EngineConfig,
    tool_name: &str,
    arguments: &Value,
    now: DateTime<Utc>,
) -> bool {
    let args_json = arguments.to_string();
    run.history.iter().rev().any(|rec| {
        rec.tool_name == tool_name
            && rec.status == ToolStatus::Success
            && rec.arguments.to_string() == args_json
            && (now - rec.started_at).num_seconds() < cfg.duplicate_window_secs as i64
    })
}

/// Shallow JSON-schema check: required fields present, declared property
/// types respected. Returns a description of each problem found.
fn validate_against_schema(schema: &Value, args: &Value) -> Vec<String> {
    let mut problems = Vec::new();

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if args.get(field).is_none() {
                problems.push(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
        for (name, prop) in props {
            let Some(value) = args.get(name) else {
                continue;
            };
            let Some(expected) = prop.get("type").and_then(|v| v.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                problems.push(format!("field '{name}' is not of type {expected}"));
            }
        }
    }

    problems
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Post-execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the post-hook hands back to the turn loop.
pub struct ToolCallOutcome {
    /// `Some(Success)` when fragments were accepted, `Some(Error)` on
    /// failure, `None` when the call succeeded without new evidence.
    pub envelope: Option<ToolEnvelope>,
    /// Content for the tool-result message when the envelope is `None`.
    pub ack: Option<String>,
    /// Consecutive same-tool error streak after this call.
    pub error_streak: u32,
}

impl ToolCallOutcome {
    /// The tool-result content fed back to the model.
    pub fn render(&self) -> String {
        match (&self.envelope, &self.ack) {
            (Some(env), _) => env.render(),
            (None, Some(ack)) => ack.clone(),
            (None, None) => "No new results.".into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.envelope, Some(ToolEnvelope::Error { .. }))
    }
}

/// Record, rank, and normalize one executed tool call.
#[allow(clippy::too_many_arguments)]
pub async fn post_execute(
    run: &mut AgentRun,
    ranker: Option<ResolvedProvider>,
    tool_name: &str,
    arguments: Value,
    expectation: Option<Expectation>,
    raw: Result<Value, String>,
    started_at: DateTime<Utc>,
    duration_ms: u64,
) -> ToolCallOutcome {
    let status = if raw.is_ok() {
        ToolStatus::Success
    } else {
        ToolStatus::Error
    };
    let error = raw.as_ref().err().cloned();

    // 1. History + cumulative metrics.
    run.history.push(ToolExecutionRecord {
        tool_name: tool_name.to_string(),
        turn_number: run.turn_count,
        arguments: arguments.clone(),
        expected_results: expectation.clone(),
        status,
        error: error.clone(),
        duration_ms,
        estimated_cost_usd: 0.0,
        started_at,
    });
    run.total_latency_ms += duration_ms;
    if let Some(exp) = expectation {
        run.fragments.record_expectation(exp);
    }

    // 2. Failure accounting + plan advance.
    let success = status == ToolStatus::Success;
    let streak = run.note_tool_outcome(tool_name, success);

    let raw = match raw {
        Ok(v) => v,
        Err(msg) => {
            run.plan.advance_after_tool(tool_name, false, &msg);
            run.fragments.record_tool_output(ToolOutputSummary {
                tool_name: tool_name.to_string(),
                args_summary: truncate(&arguments.to_string(), 200),
                result_summary: truncate(&msg, 200),
                status,
            });
            return ToolCallOutcome {
                envelope: Some(ToolEnvelope::error("tool_execution_failed", msg)),
                ack: None,
                error_streak: streak,
            };
        }
    };

    // 3–6. Fragment pipeline.
    let candidates = extract_candidates(&raw);
    let fresh: Vec<Fragment> = candidates
        .into_iter()
        .filter(|f| !run.fragments.is_duplicate(f))
        .collect();

    let kept = if fresh.is_empty() {
        Vec::new()
    } else {
        rank_fragments(ranker, &run.question, fresh).await
    };

    let turn = run.turn_count;
    let mut accepted: Vec<Fragment> = Vec::new();
    for mut fragment in kept {
        // Ids must stay unique within the run.
        if run.fragments.by_id(&fragment.id).is_some() {
            fragment.id = format!("{}-{}", fragment.id, run.fragments.len());
        }
        let image_names = scan_image_names(&fragment.content);
        fragment.images = image_names.clone();
        for file_name in image_names {
            run.fragments.add_image(FragmentImageReference {
                file_name,
                added_at_turn: turn,
                source_fragment_id: fragment.id.clone(),
                source_tool_name: tool_name.to_string(),
                is_user_attachment: false,
            });
        }
        run.fragments.admit(fragment.clone(), turn);
        accepted.push(fragment);
    }

    // 7. Tool-specific side effects.
    let ack = apply_side_effects(run, tool_name, &arguments, &raw);

    let detail = if accepted.is_empty() {
        truncate(&raw.to_string(), 120)
    } else {
        format!("{} fragments gathered", accepted.len())
    };
    run.plan.advance_after_tool(tool_name, true, &detail);

    run.fragments.record_tool_output(ToolOutputSummary {
        tool_name: tool_name.to_string(),
        args_summary: truncate(&arguments.to_string(), 200),
        result_summary: detail,
        status,
    });

    // 8. Normalized envelope.
    let envelope = if accepted.is_empty() {
        None
    } else {
        Some(ToolEnvelope::Success {
            fragments: accepted,
        })
    };
    ToolCallOutcome {
        envelope,
        ack,
        error_streak: streak,
    }
}

/// Candidate fragments from `result.data` (array or `{fragments}`), else
/// `result.metadata.contexts`.
fn extract_candidates(raw: &Value) -> Vec<Fragment> {
    let from = |v: &Value| -> Option<Vec<Fragment>> {
        serde_json::from_value(v.clone()).ok()
    };

    if let Some(data) = raw.get("data") {
        if data.is_array() {
            if let Some(frags) = from(data) {
                return frags;
            }
        }
        if let Some(inner) = data.get("fragments") {
            if let Some(frags) = from(inner) {
                return frags;
            }
        }
    }
    if let Some(contexts) = raw.get("metadata").and_then(|m| m.get("contexts")) {
        if let Some(frags) = from(contexts) {
            return frags;
        }
    }
    Vec::new()
}

fn apply_side_effects(
    run: &mut AgentRun,
    tool_name: &str,
    arguments: &Value,
    raw: &Value,
) -> Option<String> {
    match tool_name {
        tool_names::TODO_WRITE => {
            match plan_from_args(arguments) {
                Some(plan) => {
                    let count = plan.sub_tasks.len();
                    run.plan.initialize(plan);
                    Some(format!("Plan recorded with {count} sub-tasks."))
                }
                None => Some("Plan rejected: a 'goal' string is required.".into()),
            }
        }
        tool_names::LIST_CUSTOM_AGENTS => {
            run.available_agents = raw
                .get("agents")
                .and_then(|v| v.as_array())
                .map(|agents| {
                    agents
                        .iter()
                        .filter_map(|a| a.get("id").and_then(|v| v.as_str()).map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            Some(raw.to_string())
        }
        tool_names::SYNTHESIZE_FINAL_ANSWER => {
            // The synthesizer set the lock before streaming; reaffirm the
            // request flag for the envelope path.
            run.synthesis.requested = true;
            Some("Final answer streamed to the user. Acknowledge briefly; do not repeat it.".into())
        }
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
