//! SSE plumbing for streaming chat completions.
//!
//! The adapter hands a `reqwest::Response` plus a payload parser to
//! [`event_stream`]; chunks are buffered, split on the `\n\n` event
//! delimiter, and each `data:` payload is fed through the parser.

use crate::util::from_reqwest;
use cairn_domain::error::Result;
use cairn_domain::stream::{BoxStream, StreamEvent};

/// Pull complete `data:` payloads out of the buffer, leaving any trailing
/// partial event in place for the next chunk.
pub(crate) fn take_event_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }
    payloads
}

/// Build a [`BoxStream`] of [`StreamEvent`]s from a streaming HTTP
/// response and a payload parser.
///
/// Guarantees a trailing `Done` event even when the upstream closes the
/// body without one, so consumers can rely on seeing it.
pub(crate) fn event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Option<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in take_event_payloads(&mut buffer) {
                        if let Some(event) = parse(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed: flush a trailing partial event, if any.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in take_event_payloads(&mut buffer) {
                            if let Some(event) = parse(&payload) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}
