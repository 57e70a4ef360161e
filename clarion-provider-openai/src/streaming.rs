//! Streaming support for Chat Completions backends.
//!
//! Decodes both server-sent events and newline-delimited JSON into
//! [`DeltaEvent`]s:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"search"}}]}}]}
//!
//! data: [DONE]
//! ```
//!
//! ```text
//! {"message":{"content":"Hel"},"done":false}
//! {"message":{"content":""},"done":true,"eval_count":12}
//! ```
//!
//! A line that does not decode as JSON is skipped with a warning. A frame
//! carrying an `error` payload ends the stream with that error.

use clarion_types::{
    ApiError, DeltaEvent, FinishReason, ProviderError, StreamHandle, ToolCallDelta,
};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::mapping::{arguments_text, parse_usage};

/// Wrap an HTTP response body into a [`StreamHandle`].
pub(crate) fn stream_completion(
    response: reqwest::Response,
    cancel: CancellationToken,
) -> StreamHandle {
    StreamHandle::new(parse_delta_stream(response.bytes_stream(), cancel))
}

/// Parse a raw byte stream into a stream of [`DeltaEvent`]s.
///
/// Lines are split on `\n` at the byte level, so a multi-byte character
/// split across two network reads is reassembled before decoding.
/// `cancel` is checked before every read and before every emitted frame.
pub fn parse_delta_stream<S, E>(
    byte_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<DeltaEvent, ProviderError>> + Send + 'static
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut parser = DeltaParser::default();
        let mut bytes_stream = std::pin::pin!(byte_stream);
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = bytes_stream.next() => Some(next),
            };
            let Some(next) = next else {
                tracing::debug!("stream cancelled by caller");
                yield Err(ProviderError::Cancelled);
                return;
            };
            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield Err(ProviderError::StreamError(format!("stream read error: {e}")));
                    return;
                }
            };

            buf.extend_from_slice(&chunk);

            while let Some(newline_pos) = buf.iter().position(|b| *b == b'\n') {
                let line_bytes: Vec<u8> = buf.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                match parser.process_line(line.trim()) {
                    LineOutcome::Skip => {}
                    LineOutcome::Event(event) => {
                        if cancel.is_cancelled() {
                            yield Err(ProviderError::Cancelled);
                            return;
                        }
                        yield Ok(event);
                    }
                    LineOutcome::Done => return,
                    LineOutcome::Fatal(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }

        // A final line without a trailing newline
        let rest = String::from_utf8_lossy(&buf).trim().to_string();
        if !rest.is_empty() {
            match parser.process_line(&rest) {
                LineOutcome::Event(event) => yield Ok(event),
                LineOutcome::Fatal(err) => yield Err(err),
                LineOutcome::Skip | LineOutcome::Done => {}
            }
        }
    }
}

/// What a single line produced.
#[derive(Debug)]
pub(crate) enum LineOutcome {
    /// Nothing to emit (blank line, comment, unparsable JSON).
    Skip,
    /// A decoded frame.
    Event(DeltaEvent),
    /// The `[DONE]` sentinel.
    Done,
    /// An in-stream error payload.
    Fatal(ProviderError),
}

/// Per-stream decoding state.
#[derive(Debug, Default)]
pub(crate) struct DeltaParser {
    /// Next index for complete tool calls that arrive without one, so calls
    /// from separate frames are never merged.
    next_complete_index: usize,
}

impl DeltaParser {
    /// Decode one line.
    pub(crate) fn process_line(&mut self, line: &str) -> LineOutcome {
        if line.is_empty() || line.starts_with(':') {
            return LineOutcome::Skip;
        }

        let data = match line.strip_prefix("data:") {
            Some(rest) => rest.trim_start(),
            None if line.starts_with('{') => line,
            // event:, id:, retry: and anything else that is not a payload
            None => return LineOutcome::Skip,
        };

        if data == "[DONE]" {
            return LineOutcome::Done;
        }

        let json: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, line = %data, "skipping malformed stream line");
                return LineOutcome::Skip;
            }
        };

        if json.get("error").is_some_and(|e| !e.is_null()) {
            return LineOutcome::Fatal(ProviderError::Api(ApiError::from_json(None, &json)));
        }

        let event = if json["choices"].is_array() {
            self.decode_chat_chunk(&json)
        } else if json["message"].is_object() || json.get("done").is_some() {
            self.decode_ollama_chunk(&json)
        } else {
            DeltaEvent::default()
        };

        if event.is_empty() {
            LineOutcome::Skip
        } else {
            LineOutcome::Event(event)
        }
    }

    /// `{"choices":[{"delta":{...},"finish_reason":...}],"usage":{...}}`
    fn decode_chat_chunk(&mut self, json: &Value) -> DeltaEvent {
        let mut event = DeltaEvent {
            usage: parse_usage(json),
            ..DeltaEvent::default()
        };

        let Some(choice) = json["choices"].get(0) else {
            return event;
        };
        let delta = &choice["delta"];

        if let Some(content) = delta["content"].as_str()
            && !content.is_empty()
        {
            event.content = Some(content.to_string());
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            event.tool_calls = tool_calls
                .iter()
                .map(|tc| ToolCallDelta {
                    index: tc["index"].as_u64().map(|i| i as usize),
                    id: tc["id"].as_str().filter(|s| !s.is_empty()).map(str::to_string),
                    name: tc["function"]["name"].as_str().map(str::to_string),
                    arguments: tc["function"]["arguments"].as_str().map(str::to_string),
                })
                .collect();
        }

        event.finish_reason = choice["finish_reason"].as_str().map(FinishReason::from_wire);
        event
    }

    /// `{"message":{"content":...,"tool_calls":[...]},"done":bool}`
    ///
    /// Ollama sends each tool call whole, with object arguments.
    fn decode_ollama_chunk(&mut self, json: &Value) -> DeltaEvent {
        let message = &json["message"];
        let mut event = DeltaEvent::default();

        if let Some(content) = message["content"].as_str()
            && !content.is_empty()
        {
            event.content = Some(content.to_string());
        }

        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = self.next_complete_index;
                self.next_complete_index += 1;
                event.tool_calls.push(ToolCallDelta {
                    index: Some(index),
                    id: tc["id"].as_str().map(str::to_string),
                    name: tc["function"]["name"].as_str().map(str::to_string),
                    arguments: Some(arguments_text(&tc["function"]["arguments"])),
                });
            }
        }

        if json["done"].as_bool() == Some(true) {
            event.finish_reason = Some(
                json["done_reason"]
                    .as_str()
                    .map(FinishReason::from_wire)
                    .unwrap_or(FinishReason::Stop),
            );
            event.usage = parse_usage(json);
        }
        event
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
