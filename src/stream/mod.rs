//! Stream Transform Pipeline (spec §4.9): pulls one upstream SSE frame per
//! downstream poll — buffering beyond one chunk is forbidden per spec §9
//! "Streaming back-pressure" — translates it chunk-by-chunk when
//! source≠target, and emits the target format's terminator with
//! accumulated usage on stream end. Grounded on the teacher's
//! `ai/providers/openai_compatible.rs` `eventsource()` loop, generalized
//! from one fixed target shape to [`crate::translate::stream_chunks`]'s
//! per-format table and extended with usage accumulation and a
//! passthrough-with-logging variant for same-format requests (spec §8
//! scenario 2: "no translation").

use std::collections::HashMap;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::error::GatewayError;
use crate::formats::WireFormat;
use crate::formats::openai::TokenUsage;
use crate::translate::stream_chunks::{Terminator, parse_chunk, render_chunk, terminator};
use crate::translate::tool_names;

#[derive(Default)]
struct TranslateState {
    role_emitted: bool,
    usage: TokenUsage,
}

fn encode_sse(payloads: &[Value]) -> Bytes {
    let mut out = String::new();
    for payload in payloads {
        out.push_str("data: ");
        out.push_str(&payload.to_string());
        out.push_str("\n\n");
    }
    Bytes::from(out.into_bytes())
}

fn encode_terminator(term: Terminator) -> Bytes {
    match term {
        Terminator::OpenaiDone => Bytes::from_static(b"data: [DONE]\n\n"),
        Terminator::Json(payload) => encode_sse(&[payload]),
    }
}

/// Translates an upstream SSE response from `source` into `target`,
/// chunk-by-chunk, calling `on_complete` exactly once with the accumulated
/// usage when the stream ends (spec §4.9/§5: "usage persistence happens
/// exactly once per request, after the stream ends"). `tool_name_map`
/// reverses the Claude-OAuth tool-name sanitization (spec §3 "Tool-name
/// map") on every chunk's tool calls before rendering; empty for requests
/// that never needed sanitizing.
pub fn translate_stream<F>(
    response: reqwest::Response,
    source: WireFormat,
    target: WireFormat,
    model: String,
    tool_name_map: HashMap<String, String>,
    on_complete: F,
) -> impl Stream<Item = Result<Bytes, GatewayError>>
where
    F: FnOnce(TokenUsage) + Send + 'static,
{
    let upstream = response.bytes_stream().eventsource();
    let state = (upstream, TranslateState::default(), Some(on_complete), false);

    stream::unfold(state, move |(mut upstream, mut tstate, mut on_complete, done)| {
        let model = model.clone();
        let tool_name_map = tool_name_map.clone();
        async move {
            if done {
                return None;
            }
            loop {
                match upstream.next().await {
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            let bytes = encode_terminator(terminator(target, &tstate.usage));
                            if let Some(cb) = on_complete.take() {
                                cb(tstate.usage.clone());
                            }
                            return Some((Ok(bytes), (upstream, tstate, on_complete, true)));
                        }
                        let payload: Value = match serde_json::from_str(&event.data) {
                            Ok(v) => v,
                            // Malformed SSE payload: skipped, stream continues (spec §8 boundary behavior).
                            Err(_) => continue,
                        };
                        let (mut delta, usage) = parse_chunk(source, &payload);
                        if let Some(usage) = usage {
                            tstate.usage.merge(&usage);
                        }
                        tool_names::restore_tool_names(&mut delta, &tool_name_map);
                        let rendered = render_chunk(target, &delta, &model, &mut tstate.role_emitted);
                        let bytes = encode_sse(&rendered);
                        return Some((Ok(bytes), (upstream, tstate, on_complete, false)));
                    }
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "skipping malformed upstream sse frame");
                        continue;
                    }
                    None => {
                        let bytes = encode_terminator(terminator(target, &tstate.usage));
                        if let Some(cb) = on_complete.take() {
                            cb(tstate.usage.clone());
                        }
                        return Some((Ok(bytes), (upstream, tstate, on_complete, true)));
                    }
                }
            }
        }
    })
}

/// Pipes an upstream SSE response through unchanged (spec §8 scenario 2:
/// same source/target format needs no translation), while still peeking
/// each frame to accumulate usage for the end-of-stream persist callback.
pub fn passthrough_stream<F>(response: reqwest::Response, source: WireFormat, on_complete: F) -> impl Stream<Item = Result<Bytes, GatewayError>>
where
    F: FnOnce(TokenUsage) + Send + 'static,
{
    let upstream = response.bytes_stream();
    let state = (upstream, TokenUsage::default(), Some(on_complete));

    stream::unfold(state, move |(mut upstream, mut usage, mut on_complete)| async move {
        match upstream.next().await {
            Some(Ok(bytes)) => {
                accumulate_passthrough_usage(source, &bytes, &mut usage);
                Some((Ok(bytes), (upstream, usage, on_complete)))
            }
            Some(Err(err)) => Some((Err(GatewayError::Upstream(err.to_string())), (upstream, usage, on_complete))),
            None => {
                if let Some(cb) = on_complete.take() {
                    cb(usage.clone());
                }
                None
            }
        }
    })
}

fn accumulate_passthrough_usage(source: WireFormat, bytes: &Bytes, usage: &mut TokenUsage) {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return;
    };
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }
        if let Ok(payload) = serde_json::from_str::<Value>(data) {
            let (_, parsed_usage) = parse_chunk(source, &payload);
            if let Some(parsed_usage) = parsed_usage {
                usage.merge(&parsed_usage);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_sse_joins_multiple_payloads_with_blank_line_separators() {
        let bytes = encode_sse(&[serde_json::json!({"a": 1}), serde_json::json!({"b": 2})]);
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text, "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
    }

    #[test]
    fn openai_terminator_is_literal_done_line() {
        let bytes = encode_terminator(terminator(WireFormat::Openai, &TokenUsage::default()));
        assert_eq!(bytes.as_ref(), b"data: [DONE]\n\n");
    }

    #[test]
    fn passthrough_usage_accumulates_across_sse_lines() {
        let mut usage = TokenUsage::default();
        let frame = Bytes::from_static(b"data: {\"usage\": {\"prompt_tokens\": 7, \"completion_tokens\": 3}}\n\n");
        accumulate_passthrough_usage(WireFormat::Openai, &frame, &mut usage);
        assert_eq!(usage.prompt, 7);
        assert_eq!(usage.completion, 3);
    }

    #[test]
    fn passthrough_skips_done_and_malformed_lines_without_panicking() {
        let mut usage = TokenUsage::default();
        let frame = Bytes::from_static(b"data: [DONE]\n\ndata: not-json\n\n");
        accumulate_passthrough_usage(WireFormat::Openai, &frame, &mut usage);
        assert_eq!(usage, TokenUsage::default());
    }
}
