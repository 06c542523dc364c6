//! End-to-end engine scenarios over the mock provider and in-memory
//! collaborators: the full event contract, duplicate suppression,
//! failure budgets, the review lock, delegation, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use cairn_domain::config::{Config, CustomAgentConfig};
use cairn_domain::fragment::{Citation, Fragment, SourceApp};
use cairn_domain::trace::RunStatus;
use cairn_gateway::runtime::events::{ChatEvent, StepType};
use cairn_gateway::runtime::{run_chat, ChatRunRequest};
use cairn_gateway::state::AppState;
use cairn_gateway::stores::memory::{
    MemoryAttachmentStore, MemoryChatStore, MemorySearchBackend,
};
use cairn_gateway::stores::{ChatStore, MessageRole, StoredMessage};
use cairn_providers::mock::{MockProvider, ScriptedResponse};
use cairn_providers::ProviderRegistry;

const DEFAULT_REVIEW: &str =
    r#"{"status":"ok","notes":"fine","recommendation":"proceed","ambiguityResolved":true}"#;

struct Harness {
    state: AppState,
    chat_store: Arc<MemoryChatStore>,
    search: Arc<MemorySearchBackend>,
    attachments: Arc<MemoryAttachmentStore>,
    fast: Arc<MockProvider>,
}

fn harness(
    config: Config,
    planner: Vec<ScriptedResponse>,
    synth: Vec<ScriptedResponse>,
) -> Harness {
    let planner = Arc::new(MockProvider::with_script("planner", planner));
    let synth = Arc::new(MockProvider::with_script("synth", synth));
    let fast = Arc::new(
        MockProvider::new("fast").with_default(ScriptedResponse::text(DEFAULT_REVIEW)),
    );

    let mut registry = ProviderRegistry::empty();
    registry.insert("planner", planner);
    registry.insert("synth", synth.clone());
    registry.insert("fast", fast.clone());
    registry.assign_role("planner", "planner");
    registry.assign_role("synthesizer", "synth");
    registry.assign_role("fast", "fast");

    let chat_store = Arc::new(MemoryChatStore::new());
    let search = Arc::new(MemorySearchBackend::new());
    let attachments = Arc::new(MemoryAttachmentStore::new());

    let state = AppState::new(
        Arc::new(config),
        Arc::new(registry),
        chat_store.clone(),
        search.clone(),
        attachments.clone(),
    );

    Harness {
        state,
        chat_store,
        search,
        attachments,
        fast,
    }
}

async fn seed_chat(h: &Harness, chat_id: &str, question: &str) -> String {
    h.chat_store
        .create_chat(chat_id, "u1", "seeded")
        .await
        .unwrap();
    h.chat_store
        .insert_message(StoredMessage {
            id: format!("user-msg-{chat_id}"),
            chat_id: chat_id.into(),
            role: MessageRole::User,
            text: question.into(),
            citations: vec![],
            attachment_ids: vec![],
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap()
}

fn request(chat_id: &str, user_message_id: &str, question: &str) -> ChatRunRequest {
    ChatRunRequest {
        chat_id: chat_id.into(),
        user_message_id: user_message_id.into(),
        user_id: "u1".into(),
        workspace_id: "w1".into(),
        question: question.into(),
        agent_id: None,
        attachment_ids: vec![],
        model: None,
        tools_list: vec![],
        is_new_chat: false,
    }
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    let deadline = Duration::from_secs(10);
    loop {
        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(ev)) => {
                let is_end = matches!(ev, ChatEvent::End {});
                events.push(ev);
                if is_end {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => panic!("timed out waiting for events; got {events:?}"),
        }
    }
    events
}

fn response_text(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ResponseUpdate(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

fn reasoning_texts(events: &[ChatEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Reasoning(p) => Some(p.text.clone()),
            _ => None,
        })
        .collect()
}

fn step_events(events: &[ChatEvent], step_type: StepType) -> Vec<(Option<u32>, Option<String>)> {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Reasoning(p) => p.step.as_ref().and_then(|s| {
                (s.step_type == step_type).then(|| (s.iteration, s.tool_name.clone()))
            }),
            _ => None,
        })
        .collect()
}

fn kb_fragment(id: &str, doc: &str, content: &str) -> Fragment {
    Fragment {
        id: id.into(),
        content: content.into(),
        source: Citation {
            doc_id: doc.into(),
            title: format!("title {doc}"),
            url: None,
            app: SourceApp::KnowledgeBase,
            entity: None,
            chunk_index: 0,
        },
        confidence: 0.9,
        images: vec![],
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario A: plain question, no tools beyond final synthesis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn plain_question_streams_synthesized_answer() {
    let h = harness(
        Config::default(),
        vec![
            ScriptedResponse::tool_call("synthesize_final_answer", serde_json::json!({})),
            ScriptedResponse::text("Understood."),
        ],
        vec![ScriptedResponse::text("Hello! How can I help you today?")],
    );
    let msg_id = seed_chat(&h, "chat-a", "hello").await;
    let events = collect(run_chat(h.state.clone(), request("chat-a", &msg_id, "hello"))).await;

    // First event is the chat-id metadata frame.
    match &events[0] {
        ChatEvent::ResponseMetadata {
            chat_id,
            message_id,
        } => {
            assert_eq!(chat_id, "chat-a");
            assert!(message_id.is_none());
        }
        other => panic!("expected metadata first, got {other:?}"),
    }

    // Turn 0 started before any answer text.
    let starts = step_events(&events, StepType::TurnStart);
    assert_eq!(starts[0].0, Some(0));

    // The streamed chunks total the synthesizer's text.
    assert_eq!(response_text(&events), "Hello! How can I help you today?");

    // No citations for an evidence-free answer.
    assert!(!events
        .iter()
        .any(|e| matches!(e, ChatEvent::CitationsUpdate(_))));

    // Second metadata frame carries the persisted assistant message id.
    let message_id = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ResponseMetadata {
                message_id: Some(id),
                ..
            } => Some(id.clone()),
            _ => None,
        })
        .next_back()
        .expect("metadata with message id");
    let persisted = h.chat_store.messages();
    let assistant = persisted
        .iter()
        .find(|m| m.id == message_id)
        .expect("assistant message persisted");
    assert_eq!(assistant.text, "Hello! How can I help you today?");

    assert!(matches!(events.last(), Some(ChatEvent::End {})));

    // One trace row, completed.
    let traces = h.chat_store.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].status, RunStatus::Completed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario B: attachment-grounded answer with citations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn attachment_grounded_answer_cites_fragments() {
    let h = harness(
        Config::default(),
        vec![
            ScriptedResponse::tool_call("synthesize_final_answer", serde_json::json!({})),
            ScriptedResponse::text("Done."),
        ],
        vec![ScriptedResponse::text(
            "The attached report shows revenue grew 12% K[attdoc_1].",
        )],
    );
    h.attachments.seed(
        "attf_1",
        vec![
            kb_fragment("att-frag-1", "attdoc", "revenue grew 12%"),
            {
                let mut f = kb_fragment("att-frag-2", "attdoc2", "costs were flat");
                f.source.chunk_index = 0;
                f
            },
        ],
    );

    let msg_id = seed_chat(&h, "chat-b", "summarize my attachment").await;
    let mut req = request("chat-b", &msg_id, "summarize my attachment");
    req.attachment_ids = vec!["attf_1".into()];
    let events = collect(run_chat(h.state.clone(), req)).await;

    let reasoning = reasoning_texts(&events);
    assert!(reasoning
        .iter()
        .any(|t| t.contains("Analyzing user-provided attachments")));
    assert!(reasoning
        .iter()
        .any(|t| t.contains("Extracted 2 context fragments")));

    // AttachmentUpdate binds the files to the user message.
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::AttachmentUpdate { message_id, .. } if *message_id == msg_id
    )));

    // At least one citation event mapping ordinal 1 to index 0.
    let payload = events
        .iter()
        .find_map(|e| match e {
            ChatEvent::CitationsUpdate(p) => Some(p),
            _ => None,
        })
        .expect("citations update");
    assert_eq!(payload.citation_map[&1], 0);
    assert_eq!(payload.context_chunks[0].doc_id, "attdoc");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario C: duplicate suppression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn back_to_back_duplicate_search_is_suppressed() {
    let h = harness(
        Config::default(),
        vec![
            ScriptedResponse::tool_call("searchGlobal", serde_json::json!({"query": "foo"}))
                .with_tool_call("searchGlobal", serde_json::json!({"query": "foo"})),
            ScriptedResponse::tool_call("synthesize_final_answer", serde_json::json!({})),
            ScriptedResponse::text("Done."),
        ],
        vec![ScriptedResponse::text("Answer about foo.")],
    );
    h.search.seed(vec![kb_fragment("f-foo", "doc-foo", "all about foo")]);

    let msg_id = seed_chat(&h, "chat-c", "tell me about foo").await;
    let events = collect(run_chat(h.state.clone(), request("chat-c", &msg_id, "tell me about foo"))).await;

    assert!(reasoning_texts(&events)
        .iter()
        .any(|t| t == "Skipping redundant tool call to 'searchGlobal'."));

    // Exactly one start/end pair for searchGlobal.
    let starts = step_events(&events, StepType::ToolCallStart);
    let ends = step_events(&events, StepType::ToolCallEnd);
    let search_starts = starts
        .iter()
        .filter(|(_, t)| t.as_deref() == Some("searchGlobal"))
        .count();
    let search_ends = ends
        .iter()
        .filter(|(_, t)| t.as_deref() == Some("searchGlobal"))
        .count();
    assert_eq!(search_starts, 1);
    assert_eq!(search_ends, 1);

    // Emission order: every end is preceded by a matching start.
    assert!(starts.len() >= ends.len());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario D: failure budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn three_failures_block_further_executions() {
    let mut config = Config::default();
    config.connectors.gmail_synced = true;

    // Missing 'query' makes every call an execution error.
    let bad = serde_json::json!({});
    let h = harness(
        config,
        vec![
            ScriptedResponse::tool_call("searchGmail", bad.clone())
                .with_tool_call("searchGmail", bad.clone())
                .with_tool_call("searchGmail", bad.clone()),
            ScriptedResponse::tool_call("searchGmail", bad.clone())
                .with_tool_call("synthesize_final_answer", serde_json::json!({})),
            ScriptedResponse::text("Done."),
        ],
        vec![ScriptedResponse::text("I could not search Gmail.")],
    );

    let msg_id = seed_chat(&h, "chat-d", "find that email").await;
    let events = collect(run_chat(h.state.clone(), request("chat-d", &msg_id, "find that email"))).await;

    assert!(reasoning_texts(&events)
        .iter()
        .any(|t| t == "Tool 'searchGmail' has failed 3 times and is now blocked."));

    // Exactly three executions reached the backend; the fourth was
    // blocked before execution.
    let gmail_starts = step_events(&events, StepType::ToolCallStart)
        .iter()
        .filter(|(_, t)| t.as_deref() == Some("searchGmail"))
        .count();
    assert_eq!(gmail_starts, 3);

    let traces = h.chat_store.traces();
    let gmail_records = traces[0]
        .tool_records
        .iter()
        .filter(|r| r.tool_name == "searchGmail")
        .count();
    assert_eq!(gmail_records, 3);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario E: review lock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn no_reviewer_calls_after_final_synthesis() {
    let h = harness(
        Config::default(),
        vec![
            ScriptedResponse::tool_call("synthesize_final_answer", serde_json::json!({})),
            // The model keeps going with another tool call after synthesis.
            ScriptedResponse::tool_call("searchGlobal", serde_json::json!({"query": "late"})),
            ScriptedResponse::text("Done."),
        ],
        vec![ScriptedResponse::text("Early answer.")],
    );
    // Empty search index: the late call succeeds with zero fragments, so
    // the fast model is never needed as a ranker either.

    let msg_id = seed_chat(&h, "chat-e", "question").await;
    let events = collect(run_chat(h.state.clone(), request("chat-e", &msg_id, "question"))).await;

    // The late tool call executed normally.
    let late_starts = step_events(&events, StepType::ToolCallStart)
        .iter()
        .filter(|(_, t)| t.as_deref() == Some("searchGlobal"))
        .count();
    assert_eq!(late_starts, 1);

    // But no review ever ran: no review reasoning events, and the fast
    // (reviewer) provider was never called.
    assert!(step_events(&events, StepType::Review).is_empty());
    assert_eq!(h.fast.call_count(), 0);

    // Turn numbers are monotonic from 0.
    let turns: Vec<u32> = step_events(&events, StepType::TurnStart)
        .iter()
        .filter_map(|(i, _)| *i)
        .collect();
    assert_eq!(turns, vec![0, 1, 2]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario F: cancellation mid-stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancellation_stops_streaming_without_error() {
    let planner = Arc::new(MockProvider::with_script(
        "planner",
        vec![ScriptedResponse::tool_call(
            "synthesize_final_answer",
            serde_json::json!({}),
        )],
    ));
    let long_text = "chunk ".repeat(200);
    let synth = Arc::new(
        MockProvider::with_script("synth", vec![ScriptedResponse::text(long_text)])
            .with_chunk_delay(Duration::from_millis(25)),
    );
    let fast = Arc::new(
        MockProvider::new("fast").with_default(ScriptedResponse::text(DEFAULT_REVIEW)),
    );
    let mut registry = ProviderRegistry::empty();
    registry.insert("planner", planner);
    registry.insert("synth", synth);
    registry.insert("fast", fast);
    registry.assign_role("planner", "planner");
    registry.assign_role("synthesizer", "synth");
    registry.assign_role("fast", "fast");

    let chat_store = Arc::new(MemoryChatStore::new());
    let state = AppState::new(
        Arc::new(Config::default()),
        Arc::new(registry),
        chat_store.clone(),
        Arc::new(MemorySearchBackend::new()),
        Arc::new(MemoryAttachmentStore::new()),
    );

    chat_store.create_chat("chat-f", "u1", "t").await.unwrap();
    let msg_id = chat_store
        .insert_message(StoredMessage {
            id: "user-msg-f".into(),
            chat_id: "chat-f".into(),
            role: MessageRole::User,
            text: "q".into(),
            citations: vec![],
            attachment_ids: vec![],
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let mut rx = run_chat(state.clone(), request("chat-f", &msg_id, "q"));

    // Read until two answer chunks arrived, then fire the stop.
    let mut chunks_before_stop = 0;
    let mut events: Vec<ChatEvent> = Vec::new();
    while chunks_before_stop < 2 {
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event before stop")
            .expect("stream open");
        if matches!(ev, ChatEvent::ResponseUpdate(_)) {
            chunks_before_stop += 1;
        }
        events.push(ev);
    }
    assert!(state.cancel_map.cancel("chat-f"));

    // Drain the remainder.
    while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        events.push(ev);
    }

    // No error events, at most one in-flight chunk after the stop, and
    // exactly one End.
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Error { .. })));
    let total_chunks = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::ResponseUpdate(_)))
        .count();
    assert!(total_chunks <= 3, "streaming kept going after stop: {total_chunks}");
    let ends = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::End {}))
        .count();
    assert_eq!(ends, 1);

    // A trace row exists for the last persisted message (the user's).
    let traces = chat_store.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].status, RunStatus::Stopped);
    assert_eq!(traces[0].message_id.as_deref(), Some(msg_id.as_str()));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delegation end-to-end
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn delegated_agent_answer_becomes_citable_evidence() {
    const AGENT_ID: &str = "ckw1q2x3y4z5a6b7c8d9e0f1g";
    let mut config = Config::default();
    config.agents.insert(
        AGENT_ID.into(),
        CustomAgentConfig {
            name: "Finance Analyst".into(),
            description: "Answers finance questions".into(),
            prompt: "You are the finance analyst.".into(),
            capabilities: vec!["finance".into()],
            domains: vec!["finance".into()],
            allowed_apps: None,
            estimated_cost_usd: 0.01,
            resources: vec![],
        },
    );

    let agent_doc = format!("agent-{AGENT_ID}-t1");
    let h = harness(
        config,
        vec![
            // Parent turn 0: discover agents (turn-end review then sets
            // ambiguity_resolved).
            ScriptedResponse::tool_call("list_custom_agents", serde_json::json!({})),
            // Parent turn 1: delegate.
            ScriptedResponse::tool_call(
                "run_public_agent",
                serde_json::json!({"agentId": AGENT_ID, "query": "analyze the budget"}),
            ),
            // Sub-run turn 0: synthesize immediately.
            ScriptedResponse::tool_call("synthesize_final_answer", serde_json::json!({})),
            // Sub-run turn 1: acknowledgement ends the sub-run.
            ScriptedResponse::text("done"),
            // Parent turn 2: synthesize the final answer.
            ScriptedResponse::tool_call("synthesize_final_answer", serde_json::json!({})),
            // Parent turn 3: acknowledgement.
            ScriptedResponse::text("thanks"),
        ],
        vec![
            // Sub-run synthesis.
            ScriptedResponse::text("The budget grew 4% year over year."),
            // Parent synthesis, citing the agent's answer.
            ScriptedResponse::text(format!(
                "Per the finance analyst, the budget grew 4% K[{agent_doc}_1]."
            )),
        ],
    );

    let msg_id = seed_chat(&h, "chat-g", "what happened to the budget?").await;
    let events = collect(run_chat(
        h.state.clone(),
        request("chat-g", &msg_id, "what happened to the budget?"),
    ))
    .await;

    let answer = response_text(&events);
    assert!(answer.contains("budget grew 4%"));
    // The sub-run's own streamed text never reaches the client.
    assert!(!answer.contains("year over year"));

    let payload = events
        .iter()
        .find_map(|e| match e {
            ChatEvent::CitationsUpdate(p) => Some(p),
            _ => None,
        })
        .expect("agent answer cited");
    assert_eq!(payload.context_chunks[0].doc_id, agent_doc);
    assert_eq!(payload.context_chunks[0].app, SourceApp::Agent);
    assert_eq!(
        payload.context_chunks[0].entity.as_deref(),
        Some("Finance Analyst")
    );
}
