//! The between-turn reviewer.
//!
//! An LLM judge grades tool outcomes against declared expectations at
//! three points: every turn end, after two consecutive errors of one
//! tool, and once at run end. Once final synthesis is requested the
//! review latch is set and every entry point becomes a logged no-op.

use tokio::sync::mpsc;

use cairn_domain::review::{ReviewFocus, ReviewResult};
use cairn_domain::tool::Message;
use cairn_providers::registry::ResolvedProvider;
use cairn_providers::{ChatRequest, LlmProvider};

use super::events::{ChatEvent, ReasoningStep, StepStatus, StepType};
use super::prompts::reviewer_prompt;
use super::run::AgentRun;

/// Run a review unless the latch is set. Returns the verdict that was
/// recorded, or `None` when the review was skipped.
pub async fn maybe_review(
    provider: Option<ResolvedProvider>,
    run: &mut AgentRun,
    focus: ReviewFocus,
    fragment_limit: usize,
    tx: &mpsc::Sender<ChatEvent>,
) -> Option<ReviewResult> {
    if let Some(lock) = run.review_lock {
        tracing::info!(
            chat_id = %run.chat_id,
            focus = focus.as_str(),
            locked_at_turn = lock.locked_at_turn,
            "review skipped (final synthesis requested)"
        );
        return None;
    }

    let (review, usage) = call_reviewer(provider, run, focus, fragment_limit).await;
    if let Some(usage) = usage {
        run.record_usage(&usage, None);
    }

    run.ambiguity_resolved = review.ambiguity_resolved;
    run.last_review = Some(review.clone());

    let step = ReasoningStep {
        step_type: StepType::Review,
        iteration: Some(run.turn_count),
        tool_name: None,
        status: Some(StepStatus::Success),
        detail: Some(format!("{:?}", review.recommendation)),
    };
    let _ = tx
        .send(ChatEvent::reasoning_step(
            format!("Review ({}): {}", focus.as_str(), review.notes),
            step,
        ))
        .await;

    if !review.anomalies.is_empty() {
        let _ = tx
            .send(ChatEvent::reasoning(format!(
                "Anomalies noted: {}",
                review.anomalies.join("; ")
            )))
            .await;
    }

    Some(review)
}

/// Call the reviewer model; any failure coerces to the default-ok verdict
/// so the loop never halts on a malformed review.
async fn call_reviewer(
    provider: Option<ResolvedProvider>,
    run: &AgentRun,
    focus: ReviewFocus,
    fragment_limit: usize,
) -> (ReviewResult, Option<cairn_domain::stream::Usage>) {
    let Some((provider, model)) = provider else {
        tracing::warn!("no reviewer provider available, using default verdict");
        return (ReviewResult::default_ok(), None);
    };

    let req = ChatRequest {
        messages: vec![Message::user(reviewer_prompt(
            run,
            focus.as_str(),
            fragment_limit,
        ))],
        temperature: Some(0.0),
        json_mode: true,
        model,
        ..Default::default()
    };

    match provider.chat(&req).await {
        Ok(resp) => {
            let review = match ReviewResult::from_llm_text(&resp.content) {
                Some(review) => review,
                None => {
                    tracing::warn!(
                        chat_id = %run.chat_id,
                        "review payload failed schema validation, using default verdict"
                    );
                    ReviewResult::default_ok()
                }
            };
            (review, resp.usage)
        }
        Err(e) => {
            tracing::warn!(chat_id = %run.chat_id, error = %e, "reviewer call failed");
            (ReviewResult::default_ok(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_providers::mock::{MockProvider, ScriptedResponse};
    use std::sync::Arc;

    fn run() -> AgentRun {
        AgentRun::new("c", "u", "w", "q", 12)
    }

    #[tokio::test]
    async fn verdict_is_recorded_and_surfaced() {
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_script(
            "fast",
            vec![ScriptedResponse::text(
                r#"{"status":"needs_attention","notes":"gmail missed","recommendation":"gather_more","ambiguityResolved":true,"anomalies":["dup results"]}"#,
            )],
        ));
        let (tx, mut rx) = mpsc::channel(16);
        let mut r = run();

        let review = maybe_review(Some((mock, None)), &mut r, ReviewFocus::TurnEnd, 40, &tx)
            .await
            .expect("review ran");
        assert!(r.ambiguity_resolved);
        assert_eq!(r.last_review.as_ref().unwrap().notes, "gmail missed");

        // One reasoning event for the verdict, one for anomalies.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ChatEvent::Reasoning(_)));
        let second = rx.recv().await.unwrap();
        match second {
            ChatEvent::Reasoning(p) => assert!(p.text.contains("dup results")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(review.anomalies.len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_coerces_to_default_ok() {
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_script(
            "fast",
            vec![ScriptedResponse::text("not json at all")],
        ));
        let (tx, _rx) = mpsc::channel(16);
        let mut r = run();
        let review = maybe_review(Some((mock, None)), &mut r, ReviewFocus::TurnEnd, 40, &tx)
            .await
            .unwrap();
        assert_eq!(review, ReviewResult::default_ok());
    }

    #[tokio::test]
    async fn locked_run_skips_review_entirely() {
        let mock = Arc::new(MockProvider::new("fast"));
        let calls = mock.calls();
        let (tx, mut rx) = mpsc::channel(16);
        let mut r = run();
        r.lock_reviews();

        let result = maybe_review(
            Some((mock as Arc<dyn LlmProvider>, None)),
            &mut r,
            ReviewFocus::TurnEnd,
            40,
            &tx,
        )
        .await;
        assert!(result.is_none());
        assert!(calls.lock().is_empty(), "no reviewer LLM call after lock");
        assert!(rx.try_recv().is_err(), "no SSE events for skipped review");
    }
}
