//! The turn scheduler and streaming orchestrator.
//!
//! One cooperative task per run: it drives the planner model through
//! tool-calling turns, funnels every tool call through the pre/post
//! hooks, reviews each turn, and ends when the final synthesizer has
//! streamed the answer (or on error, turn exhaustion, or cancellation).
//!
//! Entry point: [`run_chat`] spawns the loop and returns a channel of
//! [`ChatEvent`]s; every suspension point observes the cancel token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use cairn_domain::error::{Error, Result};
use cairn_domain::fragment::{Citation, Fragment, FragmentImageReference, SourceApp};
use cairn_domain::review::ReviewFocus;
use cairn_domain::stream::StreamEvent;
use cairn_domain::tool::{Message, ToolCall};
use cairn_domain::trace::RunStatus;
use cairn_mcp_client::McpManager;
use cairn_providers::{ChatRequest, LlmProvider};

use super::cancel::CancelToken;
use super::citations::CitationTracker;
use super::delegation;
use super::events::{ChatEvent, CitationsPayload, ReasoningStep, StepStatus, StepType};
use super::expectations;
use super::hooks::{post_execute, pre_execute, PreDecision, SkipReason};
use super::prompts::{planner_system_prompt, title_prompt};
use super::registry::{self, build_catalog, McpCatalog, McpConnectorTools, ToolCatalog, ToolKind, ToolsListEntry};
use super::review::maybe_review;
use super::run::{AgentRun, RunPhase};
use super::synthesizer;
use super::tool_names;
use super::{build_assistant_tool_message, fallback_title, truncate_str};
use crate::state::AppState;
use crate::stores::{AttachmentStore, ChatStore, MessageRole, StoredMessage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run context & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the loop needs beyond the run state, built once per run.
pub(crate) struct RunContext {
    pub state: AppState,
    pub mcp: Arc<McpManager>,
    pub catalog: ToolCatalog,
    /// A custom agent's own system prompt (delegated runs and agent
    /// chats); `None` uses the default persona.
    pub agent_prompt: Option<String>,
    pub cancel: CancelToken,
}

impl RunContext {
    fn pricing(&self, model: Option<&str>) -> Option<&cairn_domain::config::ModelPricing> {
        model.and_then(|m| self.state.config.llm.pricing.get(m))
    }
}

/// What a completed (or stopped) loop hands back to the wrapper.
pub(crate) struct RunOutcome {
    pub status: RunStatus,
    pub answer: String,
    pub cited_fragment_ids: Vec<String>,
    pub citations: Option<CitationsPayload>,
}

/// The validated input to one chat run (the API layer has already done
/// request validation and persisted the user message).
#[derive(Debug)]
pub struct ChatRunRequest {
    pub chat_id: String,
    pub user_message_id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub question: String,
    pub agent_id: Option<String>,
    pub attachment_ids: Vec<String>,
    pub model: Option<String>,
    pub tools_list: Vec<ToolsListEntry>,
    pub is_new_chat: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_chat — public entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one user turn. Returns a receiver of [`ChatEvent`]s; the loop
/// runs in its own task and observes `/v1/chat/stop` via the cancel map.
pub fn run_chat(state: AppState, request: ChatRunRequest) -> mpsc::Receiver<ChatEvent> {
    let (tx, rx) = mpsc::channel::<ChatEvent>(64);
    let cancel = state.cancel_map.register(&request.chat_id);
    let chat_id = request.chat_id.clone();

    let span = tracing::info_span!("chat_run", chat_id = %chat_id, agent_id = ?request.agent_id);
    tokio::spawn(
        async move {
            let result = run_chat_inner(state.clone(), request, tx.clone(), cancel).await;
            state.cancel_map.remove(&chat_id);
            if let Err(e) = result {
                tracing::warn!(error = %e, "chat run failed");
                let _ = tx.send(error_event(&e)).await;
                let _ = tx.send(ChatEvent::End {}).await;
            }
        }
        .instrument(span),
    );

    rx
}

fn error_event(e: &Error) -> ChatEvent {
    let kind = match e {
        Error::MaxTurnsExceeded(_) => "max_turns_exceeded",
        Error::Provider { .. } | Error::Http(_) | Error::Timeout(_) => "stream_error",
        Error::Persistence(_) => "persistence_failure",
        _ => "internal_error",
    };
    ChatEvent::error(kind, e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_chat_inner — bootstrap, drive, persist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_chat_inner(
    state: AppState,
    request: ChatRunRequest,
    tx: mpsc::Sender<ChatEvent>,
    cancel: CancelToken,
) -> Result<()> {
    // First metadata frame: the chat id, before anything can stream.
    let _ = tx
        .send(ChatEvent::ResponseMetadata {
            chat_id: request.chat_id.clone(),
            message_id: None,
        })
        .await;

    if request.is_new_chat {
        let title = generate_title(&state, &request.question).await;
        if let Err(e) = state.chat_store.set_title(&request.chat_id, &title).await {
            tracing::warn!(error = %e, "failed to persist chat title");
        }
        let _ = tx.send(ChatEvent::ChatTitleUpdate(title)).await;
    }

    let agent_cfg = request
        .agent_id
        .as_ref()
        .and_then(|id| state.config.agents.get(id))
        .cloned();

    let mut run = AgentRun::new(
        request.chat_id.clone(),
        request.user_id.clone(),
        request.workspace_id.clone(),
        request.question.clone(),
        state.config.engine.max_turns,
    );
    run.model = request.model.clone();
    run.delegation_enabled =
        state.config.engine.delegation_enabled && request.agent_id.is_none();

    // Attachment bootstrap: seed the fragment store before turn 0.
    if !request.attachment_ids.is_empty() {
        bootstrap_attachments(&state, &mut run, &request, &tx).await;
    }

    // MCP connectors are per-run: spawn only what the request selected,
    // and always shut them down on the way out.
    let mcp = Arc::new(spawn_selected_connectors(&state, &request.tools_list).await);
    let catalog = build_catalog(
        &state.config,
        &mcp_catalog_of(&mcp),
        agent_cfg.as_ref(),
        run.delegation_enabled,
        &request.tools_list,
    );

    let ctx = RunContext {
        state: state.clone(),
        mcp: mcp.clone(),
        catalog,
        agent_prompt: agent_cfg.map(|a| a.prompt),
        cancel,
    };

    let outcome = drive_run(&ctx, &mut run, &tx).await;

    // Guaranteed release of connector processes, success or not.
    mcp.shutdown().await;

    match outcome {
        Ok(outcome) => {
            finish_run(&state, &mut run, &request, outcome, &tx).await?;
            Ok(())
        }
        Err(e) => {
            run.phase = RunPhase::Error;
            persist_trace(&state, &run, Some(request.user_message_id.clone()), RunStatus::Failed)
                .await;
            Err(e)
        }
    }
}

async fn finish_run(
    state: &AppState,
    run: &mut AgentRun,
    request: &ChatRunRequest,
    outcome: RunOutcome,
    tx: &mpsc::Sender<ChatEvent>,
) -> Result<()> {
    match outcome.status {
        RunStatus::Stopped => {
            run.phase = RunPhase::Stopped;
            // Trace for the last persisted message (the user's), then a
            // best-effort end marker and nothing else.
            persist_trace(state, run, Some(request.user_message_id.clone()), RunStatus::Stopped)
                .await;
            let _ = tx.send(ChatEvent::End {}).await;
            Ok(())
        }
        _ => {
            run.phase = RunPhase::Persisting;
            let citations: Vec<Citation> = outcome
                .citations
                .as_ref()
                .map(|p| p.context_chunks.clone())
                .unwrap_or_default();
            let message_id = uuid::Uuid::new_v4().to_string();
            let inserted = state
                .chat_store
                .insert_message(StoredMessage {
                    id: message_id.clone(),
                    chat_id: run.chat_id.clone(),
                    role: MessageRole::Assistant,
                    text: outcome.answer.clone(),
                    citations,
                    attachment_ids: Vec::new(),
                    created_at: Utc::now(),
                })
                .await;

            // Persistence failure keeps the stream alive: the user got
            // the answer, so report the problem and finish cleanly.
            let message_id = match inserted {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(chat_id = %run.chat_id, error = %e, "failed to persist assistant message");
                    let _ = tx
                        .send(ChatEvent::error("persistence_failure", e.to_string()))
                        .await;
                    None
                }
            };

            persist_trace(
                state,
                run,
                message_id
                    .clone()
                    .or_else(|| Some(request.user_message_id.clone())),
                RunStatus::Completed,
            )
            .await;

            let _ = tx
                .send(ChatEvent::ResponseMetadata {
                    chat_id: run.chat_id.clone(),
                    message_id,
                })
                .await;
            let _ = tx.send(ChatEvent::End {}).await;
            run.phase = RunPhase::Done;
            Ok(())
        }
    }
}

async fn persist_trace(
    state: &AppState,
    run: &AgentRun,
    message_id: Option<String>,
    status: RunStatus,
) {
    let trace = run.to_trace(message_id, status);
    tracing::debug!(
        chat_id = %run.chat_id,
        phase = ?run.phase,
        status = ?status,
        turns = run.turn_count,
        "persisting run trace"
    );
    if let Err(e) = state.chat_store.persist_trace(&trace).await {
        tracing::warn!(chat_id = %run.chat_id, error = %e, "failed to persist run trace");
    }
}

async fn bootstrap_attachments(
    state: &AppState,
    run: &mut AgentRun,
    request: &ChatRunRequest,
    tx: &mpsc::Sender<ChatEvent>,
) {
    let _ = tx
        .send(ChatEvent::reasoning("Analyzing user-provided attachments..."))
        .await;

    let mut extracted = 0usize;
    for file_id in &request.attachment_ids {
        let fragments = match state.attachments.fragments_for(file_id).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(file_id = %file_id, error = %e, "attachment fragment extraction failed");
                continue;
            }
        };
        for mut fragment in fragments {
            fragment.source.app = SourceApp::Attachment;
            for file_name in &fragment.images {
                run.fragments.add_image(FragmentImageReference {
                    file_name: file_name.clone(),
                    added_at_turn: 0,
                    source_fragment_id: fragment.id.clone(),
                    source_tool_name: "attachment".into(),
                    is_user_attachment: true,
                });
            }
            run.fragments.admit(fragment, 0);
            extracted += 1;
        }
    }

    let _ = tx
        .send(ChatEvent::reasoning(format!(
            "Extracted {extracted} context fragments from attachments."
        )))
        .await;
    let _ = tx
        .send(ChatEvent::AttachmentUpdate {
            message_id: request.user_message_id.clone(),
            attachments: request.attachment_ids.clone(),
        })
        .await;
}

/// Spawn only the connectors this request selected via `toolsList`.
async fn spawn_selected_connectors(state: &AppState, tools_list: &[ToolsListEntry]) -> McpManager {
    if tools_list.is_empty() {
        return McpManager::empty();
    }
    let selected: Vec<_> = state
        .config
        .mcp
        .connectors
        .iter()
        .filter(|c| tools_list.iter().any(|e| e.connector_id == c.id))
        .cloned()
        .collect();
    if selected.is_empty() {
        return McpManager::empty();
    }
    McpManager::from_config(&cairn_domain::config::McpConfig {
        connectors: selected,
    })
    .await
}

fn mcp_catalog_of(mcp: &McpManager) -> McpCatalog {
    let mut by_connector: HashMap<String, McpConnectorTools> = HashMap::new();
    for (connector_id, tool) in mcp.list_tools() {
        let entry = by_connector
            .entry(connector_id.to_string())
            .or_insert_with(|| McpConnectorTools {
                connector_id: connector_id.to_string(),
                name: mcp
                    .get(connector_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| connector_id.to_string()),
                tools: Vec::new(),
            });
        entry.tools.push((
            tool.name.clone(),
            tool.description.clone(),
            tool.input_schema.clone(),
        ));
    }
    let mut connectors: Vec<_> = by_connector.into_values().collect();
    connectors.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
    McpCatalog { connectors }
}

async fn generate_title(state: &AppState, question: &str) -> String {
    if let Some((provider, model)) = state.llm.for_role("fast") {
        let req = ChatRequest {
            messages: vec![Message::user(title_prompt(question))],
            temperature: Some(0.3),
            max_tokens: Some(24),
            model,
            ..Default::default()
        };
        match provider.chat(&req).await {
            Ok(resp) if !resp.content.trim().is_empty() => {
                return resp.content.trim().trim_matches('"').to_string();
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "title generation failed, using fallback"),
        }
    }
    fallback_title(question)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// drive_run — the turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Type-erased wrapper for recursive invocation: a delegated sub-run
/// calls back into [`drive_run`], and boxing breaks the future cycle.
pub(crate) fn drive_run_owned(
    ctx: RunContext,
    mut run: AgentRun,
    tx: mpsc::Sender<ChatEvent>,
) -> futures_core::future::BoxFuture<'static, (Result<RunOutcome>, AgentRun)> {
    Box::pin(async move {
        let outcome = drive_run(&ctx, &mut run, &tx).await;
        (outcome, run)
    })
}

fn stopped_outcome(run: &AgentRun, tracker: &CitationTracker) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Stopped,
        answer: run.synthesis.streamed_text.clone(),
        cited_fragment_ids: tracker.cited_ids().to_vec(),
        citations: None,
    }
}

/// Drive one run to completion. Shared by top-level chats and delegated
/// sub-runs (which pass a reduced context and a drained channel).
pub(crate) async fn drive_run(
    ctx: &RunContext,
    run: &mut AgentRun,
    tx: &mpsc::Sender<ChatEvent>,
) -> Result<RunOutcome> {
    let mut messages: Vec<Message> = vec![Message::user(run.question.clone())];
    let mut tracker = CitationTracker::new();
    let fragment_limit = ctx.state.config.engine.review_fragment_limit;

    for turn in 0..run.max_turns {
        run.turn_count = turn;
        run.phase = RunPhase::Planning;

        if ctx.cancel.is_cancelled() {
            return Ok(stopped_outcome(run, &tracker));
        }

        run.ledger.on_turn_start(turn);
        let _ = tx
            .send(ChatEvent::reasoning_step(
                format!("Turn {turn} started"),
                ReasoningStep::turn(StepType::TurnStart, turn),
            ))
            .await;

        // ── LLM call for this turn ────────────────────────────────
        let (provider, role_model) = ctx
            .state
            .llm
            .for_role("planner")
            .ok_or_else(|| Error::Other("no planner provider configured".into()))?;
        let model = run.model.clone().or(role_model);

        let system = planner_system_prompt(run, &ctx.catalog.definitions(), ctx.agent_prompt.as_deref());
        let mut turn_messages = Vec::with_capacity(messages.len() + 1);
        turn_messages.push(Message::system(system));
        turn_messages.extend(messages.iter().cloned());

        let req = ChatRequest {
            messages: turn_messages,
            tools: ctx.catalog.definitions(),
            temperature: Some(0.2),
            model: model.clone(),
            ..Default::default()
        };

        let llm_started = Instant::now();
        let mut stream = provider
            .chat_stream(&req)
            .instrument(tracing::info_span!("llm.call", turn))
            .await?;

        let mut text_buf = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        // call_id -> (tool_name, partial args) for providers that only
        // send start + deltas.
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();
        let mut turn_usage = None;
        let mut was_cancelled = false;

        while let Some(event) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                was_cancelled = true;
                break;
            }
            match event? {
                StreamEvent::Token { text } => text_buf.push_str(&text),
                StreamEvent::Thinking { text } => {
                    tracing::trace!(chat_id = %run.chat_id, "thinking: {text}");
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    tc_bufs.insert(call_id, (tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    tc_bufs.remove(&call_id);
                    pending.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done { usage, .. } => turn_usage = usage,
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: provider.provider_id().to_string(),
                        message,
                    });
                }
            }
        }

        run.total_latency_ms += llm_started.elapsed().as_millis() as u64;
        if let Some(usage) = &turn_usage {
            run.record_usage(usage, ctx.pricing(model.as_deref()));
        }
        if was_cancelled {
            return Ok(stopped_outcome(run, &tracker));
        }

        // Assemble calls that never saw a ToolCallFinished; order by
        // call id for determinism.
        let mut leftovers: Vec<(String, (String, String))> = tc_bufs.drain().collect();
        leftovers.sort_by(|a, b| a.0.cmp(&b.0));
        for (call_id, (tool_name, args_str)) in leftovers {
            let arguments = if args_str.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args_str).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            pending.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        // Upstream events may omit call ids entirely.
        for (index, tc) in pending.iter_mut().enumerate() {
            if tc.call_id.is_empty() {
                tc.call_id = format!("synthetic-{turn}-{}-{index}", run.history.len());
            }
        }

        // Expectations declared in this turn's assistant text.
        let declared = expectations::extract(&text_buf);
        if !declared.is_empty() {
            run.ledger.ingest(declared, turn);
        }

        // ── No tool calls: the run ends this turn ─────────────────
        if pending.is_empty() {
            let trimmed = text_buf.trim();
            if run.synthesis.suppress_assistant_streaming {
                if !trimmed.is_empty() {
                    run.synthesis.ack_received = true;
                    tracing::info!(
                        chat_id = %run.chat_id,
                        ack = %truncate_str(trimmed, 120),
                        "assistant acknowledgement after synthesis"
                    );
                }
            } else if !trimmed.is_empty() {
                let _ = tx.send(ChatEvent::ResponseUpdate(text_buf.clone())).await;
            }

            run.phase = RunPhase::Reviewing;
            maybe_review(
                ctx.state.llm.for_role("fast"),
                run,
                ReviewFocus::RunEnd,
                fragment_limit,
                tx,
            )
            .await;
            run.fragments.finalize_turn();

            let answer = if run.synthesis.completed {
                run.synthesis.streamed_text.clone()
            } else {
                text_buf
            };
            let citations = if tracker.is_empty() {
                None
            } else {
                Some(tracker.payload(&run.fragments))
            };
            return Ok(RunOutcome {
                status: RunStatus::Completed,
                answer,
                cited_fragment_ids: tracker.cited_ids().to_vec(),
                citations,
            });
        }

        // ── Tool execution, sequential and hook-wrapped ───────────
        run.phase = RunPhase::Executing;
        messages.push(build_assistant_tool_message(&text_buf, &pending));

        for tc in &pending {
            if ctx.cancel.is_cancelled() {
                return Ok(stopped_outcome(run, &tracker));
            }

            let expectation = run.ledger.assign(&tc.tool_name);
            let schema = ctx.catalog.schema_of(&tc.tool_name).cloned();

            let decision = pre_execute(
                run,
                &ctx.state.config.engine,
                schema.as_ref(),
                &tc.tool_name,
                &tc.arguments,
                Utc::now(),
            );

            let args = match decision {
                PreDecision::Skip(SkipReason::Duplicate) => {
                    let _ = tx
                        .send(ChatEvent::reasoning(format!(
                            "Skipping redundant tool call to '{}'.",
                            tc.tool_name
                        )))
                        .await;
                    messages.push(Message::tool_result(
                        &tc.call_id,
                        "Skipped: an identical call just succeeded; reuse its results.",
                    ));
                    continue;
                }
                PreDecision::Skip(SkipReason::Blocked { failures }) => {
                    let _ = tx
                        .send(ChatEvent::reasoning(format!(
                            "Tool '{}' has failed {failures} times and is now blocked.",
                            tc.tool_name
                        )))
                        .await;
                    messages.push(Message::tool_result(
                        &tc.call_id,
                        "Skipped: this tool is blocked for the rest of the run.",
                    ));
                    continue;
                }
                PreDecision::Proceed(args) => args,
            };

            let _ = tx
                .send(ChatEvent::reasoning_step(
                    format!("Calling {}...", tc.tool_name),
                    ReasoningStep::tool(
                        StepType::ToolCallStart,
                        turn,
                        &tc.tool_name,
                        StepStatus::Started,
                    ),
                ))
                .await;

            let started_at = Utc::now();
            let tool_started = Instant::now();
            let raw = execute_tool(ctx, run, &mut tracker, tx, &tc.tool_name, &args)
                .instrument(tracing::info_span!("tool.call", tool_name = %tc.tool_name))
                .await;
            if ctx.cancel.is_cancelled() {
                return Ok(stopped_outcome(run, &tracker));
            }
            let duration_ms = tool_started.elapsed().as_millis() as u64;

            // History records the arguments as the model issued them, so
            // the duplicate rule compares like with like; execution used
            // the augmented copy.
            let outcome = post_execute(
                run,
                ctx.state.llm.for_role("fast"),
                &tc.tool_name,
                tc.arguments.clone(),
                expectation,
                raw,
                started_at,
                duration_ms,
            )
            .await;

            let _ = tx
                .send(ChatEvent::reasoning_step(
                    format!(
                        "{} {}",
                        tc.tool_name,
                        if outcome.is_error() { "failed" } else { "finished" }
                    ),
                    ReasoningStep::tool(
                        StepType::ToolCallEnd,
                        turn,
                        &tc.tool_name,
                        if outcome.is_error() {
                            StepStatus::Error
                        } else {
                            StepStatus::Success
                        },
                    ),
                ))
                .await;

            messages.push(Message::tool_result(&tc.call_id, outcome.render()));

            // Two consecutive errors of one tool force an early review.
            if outcome.error_streak == 2 {
                run.phase = RunPhase::Reviewing;
                maybe_review(
                    ctx.state.llm.for_role("fast"),
                    run,
                    ReviewFocus::ToolError,
                    fragment_limit,
                    tx,
                )
                .await;
                run.phase = RunPhase::Executing;
            }
        }

        // ── Turn end: review, then fold the turn's artifacts ──────
        let _ = tx
            .send(ChatEvent::reasoning_step(
                format!("Turn {turn} complete"),
                ReasoningStep::turn(StepType::TurnEnd, turn),
            ))
            .await;

        run.phase = RunPhase::Reviewing;
        maybe_review(
            ctx.state.llm.for_role("fast"),
            run,
            ReviewFocus::TurnEnd,
            fragment_limit,
            tx,
        )
        .await;
        run.fragments.finalize_turn();
    }

    Err(Error::MaxTurnsExceeded(run.max_turns))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one tool call, returning the raw result for the post-hook.
async fn execute_tool(
    ctx: &RunContext,
    run: &mut AgentRun,
    tracker: &mut CitationTracker,
    tx: &mpsc::Sender<ChatEvent>,
    tool_name: &str,
    arguments: &Value,
) -> std::result::Result<Value, String> {
    match tool_name {
        // Plan replacement happens in the post-hook so the record is
        // written either way.
        tool_names::TODO_WRITE => Ok(serde_json::json!({ "accepted": true })),
        tool_names::SYNTHESIZE_FINAL_ANSWER => {
            run.phase = RunPhase::Synthesizing;
            let result = synthesizer::synthesize(ctx, run, tracker, tx, arguments).await;
            run.phase = RunPhase::Executing;
            result
        }
        tool_names::LIST_CUSTOM_AGENTS => {
            Ok(delegation::list_custom_agents(ctx, run, arguments).await)
        }
        tool_names::RUN_PUBLIC_AGENT => delegation::run_public_agent(ctx, run, arguments).await,
        other => match ctx.catalog.spec(other) {
            Some(spec) => match &spec.kind {
                ToolKind::Builtin => {
                    registry::dispatch_search(ctx.state.search.as_ref(), run, other, arguments)
                        .await
                }
                ToolKind::Mcp {
                    connector_id,
                    tool_name: mcp_tool,
                } => {
                    let result = ctx
                        .mcp
                        .call_tool(connector_id, mcp_tool, arguments.clone())
                        .await
                        .map_err(|e| format!("{other}: {e}"))?;
                    let text = result.text();
                    if result.is_error {
                        return Err(format!("{other}: {text}"));
                    }
                    let fragment = mcp_fragment(connector_id, mcp_tool, run.turn_count, &text);
                    Ok(serde_json::json!({ "data": [fragment] }))
                }
            },
            None => Err(format!("unknown tool '{other}'")),
        },
    }
}

fn mcp_fragment(connector_id: &str, tool_name: &str, turn: u32, text: &str) -> Fragment {
    Fragment {
        id: format!("mcp-{connector_id}-{tool_name}-t{turn}"),
        content: text.to_string(),
        source: Citation {
            doc_id: format!("mcp-{connector_id}-{tool_name}-t{turn}"),
            title: format!("{connector_id}/{tool_name}"),
            url: None,
            app: SourceApp::Mcp,
            entity: Some(connector_id.to_string()),
            chunk_index: 0,
        },
        confidence: 0.8,
        images: vec![],
    }
}
