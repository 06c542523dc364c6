//! Per-run state — one [`AgentRun`] per user turn, exclusively owned by
//! the orchestrator loop and passed by `&mut` into every step.

use std::collections::HashMap;

use cairn_domain::config::ModelPricing;
use cairn_domain::review::ReviewResult;
use cairn_domain::stream::Usage;
use cairn_domain::trace::{RunStatus, RunTrace, ToolExecutionRecord};

use super::expectations::ExpectationLedger;
use super::fragments::FragmentStore;
use super::plan::PlanMachine;

/// Engine phases, tracked for tracing and the run trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Planning,
    Executing,
    Reviewing,
    Synthesizing,
    Persisting,
    Done,
    Error,
    Stopped,
}

/// State of the final synthesis step.
#[derive(Debug, Clone, Default)]
pub struct FinalSynthesisState {
    pub requested: bool,
    pub completed: bool,
    pub suppress_assistant_streaming: bool,
    pub streamed_text: String,
    pub ack_received: bool,
}

/// The review latch: set when final synthesis is requested, after which
/// every review entry point skips.
#[derive(Debug, Clone, Copy)]
pub struct ReviewLock {
    pub locked_at_turn: u32,
}

pub struct AgentRun {
    pub chat_id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub question: String,
    /// Model override from `selectedModelConfig`.
    pub model: Option<String>,

    pub turn_count: u32,
    pub max_turns: u32,
    pub phase: RunPhase,

    pub usage: Usage,
    pub total_cost_usd: f64,
    pub total_latency_ms: u64,

    pub fragments: FragmentStore,
    pub plan: PlanMachine,
    pub ledger: ExpectationLedger,

    pub history: Vec<ToolExecutionRecord>,
    pub failure_counts: HashMap<String, u32>,
    /// `(tool_name, streak)` of the most recent consecutive errors.
    pub error_streak: Option<(String, u32)>,

    /// Agent ids surfaced by the most recent `list_custom_agents` call.
    pub available_agents: Vec<String>,
    pub delegation_enabled: bool,
    /// Parent turn number when this is a delegated sub-run.
    pub parent_turn: Option<u32>,

    pub ambiguity_resolved: bool,
    pub last_review: Option<ReviewResult>,
    pub review_lock: Option<ReviewLock>,
    pub synthesis: FinalSynthesisState,
}

impl AgentRun {
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
        question: impl Into<String>,
        max_turns: u32,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            question: question.into(),
            model: None,
            turn_count: 0,
            max_turns,
            phase: RunPhase::Idle,
            usage: Usage::default(),
            total_cost_usd: 0.0,
            total_latency_ms: 0,
            fragments: FragmentStore::new(),
            plan: PlanMachine::new(),
            ledger: ExpectationLedger::new(),
            history: Vec::new(),
            failure_counts: HashMap::new(),
            error_streak: None,
            available_agents: Vec::new(),
            delegation_enabled: true,
            parent_turn: None,
            ambiguity_resolved: false,
            last_review: None,
            review_lock: None,
            synthesis: FinalSynthesisState::default(),
        }
    }

    pub fn is_review_locked(&self) -> bool {
        self.review_lock.is_some()
    }

    /// Engage the review lock (idempotent).
    pub fn lock_reviews(&mut self) {
        if self.review_lock.is_none() {
            self.review_lock = Some(ReviewLock {
                locked_at_turn: self.turn_count,
            });
        }
    }

    /// Record LLM usage plus its estimated cost.
    pub fn record_usage(&mut self, usage: &Usage, pricing: Option<&ModelPricing>) {
        self.usage.add(usage);
        if let Some(p) = pricing {
            self.total_cost_usd += p.estimate_cost(usage.prompt_tokens, usage.completion_tokens);
        }
    }

    pub fn failures_of(&self, tool_name: &str) -> u32 {
        self.failure_counts.get(tool_name).copied().unwrap_or(0)
    }

    /// Track a tool outcome for the failure budget and the consecutive
    /// same-tool error streak. Returns the updated streak length.
    pub fn note_tool_outcome(&mut self, tool_name: &str, success: bool) -> u32 {
        if success {
            self.error_streak = None;
            return 0;
        }
        *self.failure_counts.entry(tool_name.to_string()).or_insert(0) += 1;
        let streak = match &mut self.error_streak {
            Some((name, n)) if name == tool_name => {
                *n += 1;
                *n
            }
            _ => {
                self.error_streak = Some((tool_name.to_string(), 1));
                1
            }
        };
        streak
    }

    pub fn to_trace(&self, message_id: Option<String>, status: RunStatus) -> RunTrace {
        RunTrace {
            chat_id: self.chat_id.clone(),
            message_id,
            question: self.question.clone(),
            turn_count: self.turn_count,
            status,
            tool_records: self.history.clone(),
            total_cost_usd: self.total_cost_usd,
            total_latency_ms: self.total_latency_ms,
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            created_at: chrono::Utc::now(),
        }
    }
}
