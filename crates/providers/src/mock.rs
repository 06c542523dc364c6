//! Scripted provider for tests.
//!
//! Each call pops the next [`ScriptedResponse`]; streaming calls replay
//! the same response as token chunks and tool-call events, optionally
//! with a delay between chunks so cancellation paths can be exercised.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cairn_domain::error::{Error, Result};
use cairn_domain::stream::{BoxStream, StreamEvent, Usage};
use cairn_domain::tool::ToolCall;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

/// One scripted model reply.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl ScriptedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
        }
    }

    pub fn tool_call(tool_name: &str, arguments: serde_json::Value) -> Self {
        Self::text("").with_tool_call(tool_name, arguments)
    }

    pub fn with_tool_call(mut self, tool_name: &str, arguments: serde_json::Value) -> Self {
        let idx = self.tool_calls.len();
        self.tool_calls.push(ToolCall {
            call_id: format!("call_{tool_name}_{idx}"),
            tool_name: tool_name.to_string(),
            arguments,
        });
        self
    }
}

pub struct MockProvider {
    id: String,
    script: Mutex<VecDeque<ScriptedResponse>>,
    /// Returned when the script runs dry; `None` = error instead.
    default_response: Option<ScriptedResponse>,
    /// Pause between streamed chunks (cancellation tests).
    chunk_delay: Option<Duration>,
    /// Every request this provider served, in order.
    calls: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            default_response: None,
            chunk_delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_script(id: impl Into<String>, script: Vec<ScriptedResponse>) -> Self {
        let mut p = Self::new(id);
        p.script = Mutex::new(script.into());
        p
    }

    /// Serve this response whenever the script is exhausted.
    pub fn with_default(mut self, resp: ScriptedResponse) -> Self {
        self.default_response = Some(resp);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn push(&self, resp: ScriptedResponse) {
        self.script.lock().push_back(resp);
    }

    /// Requests served so far (shared handle, survives moves into Arc).
    pub fn calls(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        self.calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_response(&self, req: &ChatRequest) -> Result<ScriptedResponse> {
        self.calls.lock().push(req.clone());
        if let Some(resp) = self.script.lock().pop_front() {
            return Ok(resp);
        }
        match &self.default_response {
            Some(resp) => Ok(resp.clone()),
            None => Err(Error::Provider {
                provider: self.id.clone(),
                message: "mock script exhausted".into(),
            }),
        }
    }
}

/// Split text into streaming chunks of roughly `size` characters on char
/// boundaries.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if current.chars().count() >= size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let resp = self.next_response(req)?;
        let finish = if resp.tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        Ok(ChatResponse {
            content: resp.text,
            tool_calls: resp.tool_calls,
            usage: Some(resp.usage),
            model: "mock".into(),
            finish_reason: Some(finish.into()),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.next_response(req)?;
        let delay = self.chunk_delay;

        let stream = async_stream::stream! {
            for chunk in chunk_text(&resp.text, 8) {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                yield Ok(StreamEvent::Token { text: chunk });
            }
            for tc in resp.tool_calls {
                yield Ok(StreamEvent::ToolCallStarted {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                });
                yield Ok(StreamEvent::ToolCallFinished {
                    call_id: tc.call_id,
                    tool_name: tc.tool_name,
                    arguments: tc.arguments,
                });
            }
            yield Ok(StreamEvent::Done {
                usage: Some(resp.usage),
                finish_reason: None,
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
