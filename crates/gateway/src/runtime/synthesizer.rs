//! Final synthesizer — the terminal tool.
//!
//! Streams the cited answer straight to the transport, engaging the
//! review lock first and rolling it back if streaming fails so the
//! engine may try again.

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use cairn_domain::stream::StreamEvent;
use cairn_domain::tool::Message;
use cairn_providers::{ChatRequest, LlmProvider};

use super::citations::CitationTracker;
use super::events::{ChatEvent, ImageCitationPayload, ReasoningStep, StepStatus, StepType};
use super::prompts::synthesis_prompt;
use super::run::AgentRun;
use super::turn::RunContext;

/// Execute `synthesize_final_answer`.
///
/// On success the raw result for the post-hook describes the stream; on
/// failure the lock is rolled back and the error surfaces like any other
/// tool error (a later invocation may succeed).
pub async fn synthesize(
    ctx: &RunContext,
    run: &mut AgentRun,
    tracker: &mut CitationTracker,
    tx: &mpsc::Sender<ChatEvent>,
    _arguments: &Value,
) -> Result<Value, String> {
    if run.synthesis.completed {
        return Err("final answer was already streamed".into());
    }

    // 1. Lock further reviews before the first chunk can reach the user.
    run.lock_reviews();
    run.synthesis.requested = true;

    // 2. Image selection: user attachments first, then most recent.
    let images = run
        .fragments
        .images_for_synthesis(ctx.state.config.engine.max_images);
    let image_names: Vec<String> = images.iter().map(|i| i.file_name.clone()).collect();

    let _ = tx
        .send(ChatEvent::reasoning_step(
            "Synthesizing the final answer...",
            ReasoningStep {
                step_type: StepType::Synthesis,
                iteration: Some(run.turn_count),
                tool_name: None,
                status: Some(StepStatus::Started),
                detail: None,
            },
        ))
        .await;

    // 3. Build the citation-mandating prompt and stream the model.
    let Some((provider, role_model)) = ctx.state.llm.for_role("synthesizer") else {
        rollback(run);
        return Err("no synthesizer provider available".into());
    };
    let model = run.model.clone().or(role_model);

    let req = ChatRequest {
        messages: vec![
            Message::system(synthesis_prompt(run, &image_names)),
            Message::user(run.question.clone()),
        ],
        model: model.clone(),
        ..Default::default()
    };

    let mut stream = match provider.chat_stream(&req).await {
        Ok(s) => s,
        Err(e) => {
            rollback(run);
            return Err(format!("synthesis stream failed to start: {e}"));
        }
    };

    let mut emitted_images: Vec<String> = Vec::new();

    while let Some(event) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err("cancelled".into());
        }
        match event {
            Ok(StreamEvent::Token { text }) => {
                run.synthesis.streamed_text.push_str(&text);
                let _ = tx.send(ChatEvent::ResponseUpdate(text)).await;

                // Citations are emitted strictly after the text that
                // introduced them.
                if let Some(payload) = tracker.scan(&run.synthesis.streamed_text, &run.fragments) {
                    let _ = tx.send(ChatEvent::CitationsUpdate(payload)).await;
                    emit_image_citations(run, tracker, &images, &mut emitted_images, tx).await;
                }
            }
            Ok(StreamEvent::Done { usage, .. }) => {
                if let Some(usage) = usage {
                    let pricing = model
                        .as_deref()
                        .and_then(|m| ctx.state.config.llm.pricing.get(m));
                    run.record_usage(&usage, pricing);
                }
                break;
            }
            Ok(StreamEvent::Error { message }) => {
                rollback(run);
                return Err(format!("synthesis stream error: {message}"));
            }
            Ok(_) => {}
            Err(e) => {
                rollback(run);
                return Err(format!("synthesis stream error: {e}"));
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        return Err("cancelled".into());
    }

    // 4. Success: latch completion and suppress later assistant text.
    run.synthesis.completed = true;
    run.synthesis.suppress_assistant_streaming = true;

    Ok(json!({
        "streamed": true,
        "characters": run.synthesis.streamed_text.len(),
        "citations": tracker.cited_ids().len(),
    }))
}

/// Roll the latch back after a failed synthesis so the run can recover
/// (reviews resume; the tool may be invoked again).
fn rollback(run: &mut AgentRun) {
    run.review_lock = None;
    run.synthesis.requested = false;
    run.synthesis.suppress_assistant_streaming = false;
}

async fn emit_image_citations(
    run: &AgentRun,
    tracker: &CitationTracker,
    selected: &[cairn_domain::fragment::FragmentImageReference],
    emitted: &mut Vec<String>,
    tx: &mpsc::Sender<ChatEvent>,
) {
    for id in tracker.cited_ids() {
        let Some(fragment) = run.fragments.by_id(id) else {
            continue;
        };
        for image in selected.iter().filter(|i| i.source_fragment_id == *id) {
            if emitted.contains(&image.file_name) {
                continue;
            }
            emitted.push(image.file_name.clone());
            let _ = tx
                .send(ChatEvent::ImageCitationUpdate(ImageCitationPayload {
                    image: image.clone(),
                    citation_key: fragment.citation_key(),
                }))
                .await;
        }
    }
}
