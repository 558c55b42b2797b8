//! Kiro executor: AWS CodeWhisperer's binary EventStream dialect (spec §4.3,
//! §9). Genuinely distinct from [`super::default_executor`] — the upstream
//! response is a binary frame stream, not SSE, so it needs its own parser
//! and its own translation state machine rather than reuse of
//! `translate::stream_chunks`. No corpus precedent exists for this framing;
//! it is implemented directly from the spec's byte-exact description as a
//! stateful byte-buffer consumer (never line-based), matching the
//! Result-returning, defensive style of `credentials::store`.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use serde_json::Value;

use super::{ExecuteOutcome, Executor, ExecutorError};
use crate::credentials::{Connection, ProviderKind, RefreshedTokens};
use crate::formats::openai::{Role, StreamDelta, StreamToolCallDelta};

const PRELUDE_LEN: usize = 12;
const TAIL_CRC_LEN: usize = 4;

pub struct KiroExecutor {
    pub base_url: String,
}

impl KiroExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

#[async_trait]
impl Executor for KiroExecutor {
    fn build_url(&self, _model: &str, _stream: bool) -> String {
        format!("{}/generateAssistantResponse", self.base_url.trim_end_matches('/'))
    }

    fn build_headers(&self, connection: &Connection, _stream: bool) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = &connection.secrets.access_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    async fn execute(
        &self,
        http: &reqwest::Client,
        model: &str,
        body: &Value,
        stream: bool,
        connection: &Connection,
    ) -> Result<ExecuteOutcome, ExecutorError> {
        let url = self.build_url(model, stream);
        let headers = self.build_headers(connection, stream);
        let transformed_body = body.clone();

        let mut request = http.post(&url);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        let response = request.json(&transformed_body).send().await?;

        Ok(ExecuteOutcome {
            response,
            url,
            headers,
            transformed_body,
        })
    }

    async fn refresh_credentials(&self, connection: &Connection, http: &reqwest::Client) -> Result<Option<RefreshedTokens>, ExecutorError> {
        let kind = if connection.provider_id == "kiro-social" {
            ProviderKind::KiroSocial
        } else {
            ProviderKind::Kiro
        };
        Ok(crate::credentials::oauth::refresh(kind, connection, http).await?)
    }
}

/// One decoded EventStream frame: its `:event-type` header (if present as a
/// string-type header) and its JSON payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub event_type: Option<String>,
    pub payload: Value,
}

/// Stateful byte-buffer consumer for AWS EventStream framing: 16-byte
/// prelude (total length, headers length, prelude CRC), header block,
/// payload, 4-byte tail CRC. CRC is tolerated, never verified (spec §9).
#[derive(Default)]
pub struct EventStreamParser {
    buffer: BytesMut,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pops and decodes the next complete frame from the buffer, or `None`
    /// if fewer bytes than one full frame have arrived so far — the caller
    /// is expected to `feed` more and retry.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ExecutorError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
        if total_len < PRELUDE_LEN + TAIL_CRC_LEN || self.buffer.len() < total_len {
            return Ok(None);
        }
        let headers_len = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap()) as usize;
        // bytes [8..12] are the prelude CRC; not verified.

        let headers_start = PRELUDE_LEN;
        let headers_end = headers_start + headers_len;
        let payload_end = total_len - TAIL_CRC_LEN;
        if headers_end > payload_end || payload_end > self.buffer.len() {
            return Err(ExecutorError::Frame("eventstream header/payload length out of bounds".to_string()));
        }

        let headers = parse_headers(&self.buffer[headers_start..headers_end])?;
        let payload_bytes = &self.buffer[headers_end..payload_end];
        let payload: Value = if payload_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(payload_bytes).unwrap_or(Value::Null)
        };
        let event_type = headers.get(":event-type").cloned();

        self.buffer.advance(total_len);
        Ok(Some(Frame { event_type, payload }))
    }
}

/// Parses the `{nameLen:u8, name, type:u8, len:u16-be, value}` header block.
/// Only the string type (7) is required by spec; any other type ends
/// parsing of the remaining headers rather than guessing its length.
fn parse_headers(mut bytes: &[u8]) -> Result<HashMap<String, String>, ExecutorError> {
    let mut headers = HashMap::new();
    while !bytes.is_empty() {
        let name_len = bytes[0] as usize;
        bytes = &bytes[1..];
        if bytes.len() < name_len {
            return Err(ExecutorError::Frame("truncated eventstream header name".to_string()));
        }
        let name = String::from_utf8_lossy(&bytes[..name_len]).to_string();
        bytes = &bytes[name_len..];

        if bytes.is_empty() {
            return Err(ExecutorError::Frame("truncated eventstream header type".to_string()));
        }
        let value_type = bytes[0];
        bytes = &bytes[1..];
        if value_type != 7 {
            break;
        }
        if bytes.len() < 2 {
            return Err(ExecutorError::Frame("truncated eventstream header length".to_string()));
        }
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        bytes = &bytes[2..];
        if bytes.len() < len {
            return Err(ExecutorError::Frame("truncated eventstream header value".to_string()));
        }
        let value = String::from_utf8_lossy(&bytes[..len]).to_string();
        bytes = &bytes[len..];
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Translates decoded Kiro frames into OpenAI-style stream deltas (spec
/// §4.3 emission rules). Holds per-stream state: tool-call index
/// allocation, whether any tool call was seen, and whether the finish chunk
/// has already been emitted.
///
/// Finish emission follows the deterministic alternative to the spec's
/// "~100ms quiet period" heuristic: a `meteringEvent`/`contextUsageEvent` is
/// held as pending, and the finish chunk is emitted as soon as either a
/// later non-metering frame arrives or the stream ends.
#[derive(Default)]
pub struct KiroStreamTranslator {
    tool_indices: HashMap<String, u32>,
    next_tool_index: u32,
    has_tool_calls: bool,
    finish_emitted: bool,
    role_emitted: bool,
    pending_metering: bool,
}

impl KiroStreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_frame(&mut self, frame: &Frame) -> Vec<StreamDelta> {
        let mut out = Vec::new();
        let is_metering = matches!(frame.event_type.as_deref(), Some("meteringEvent") | Some("contextUsageEvent"));
        if self.pending_metering && !is_metering && !self.finish_emitted {
            out.push(self.finish_delta());
        }
        if is_metering {
            self.pending_metering = true;
            return out;
        }
        self.pending_metering = false;

        match frame.event_type.as_deref() {
            Some("assistantResponseEvent") | Some("codeEvent") => {
                if let Some(content) = frame.payload.get("content").and_then(Value::as_str) {
                    out.push(self.content_delta(content));
                }
            }
            Some("toolUseEvent") => out.extend(self.tool_use_delta(&frame.payload)),
            Some("messageStopEvent") => {
                if !self.finish_emitted {
                    out.push(self.finish_delta());
                }
            }
            _ => {}
        }
        out
    }

    /// Called once the upstream frame stream ends; emits the finish chunk
    /// if nothing else has already.
    pub fn flush_on_eof(&mut self) -> Vec<StreamDelta> {
        if self.finish_emitted {
            vec![]
        } else {
            vec![self.finish_delta()]
        }
    }

    fn content_delta(&mut self, content: &str) -> StreamDelta {
        let role = if self.role_emitted {
            None
        } else {
            self.role_emitted = true;
            Some(Role::Assistant)
        };
        StreamDelta {
            role,
            content: Some(content.to_string()),
            tool_calls: vec![],
            finish_reason: None,
        }
    }

    fn tool_use_delta(&mut self, payload: &Value) -> Vec<StreamDelta> {
        let tool_use_id = payload.get("toolUseId").and_then(Value::as_str).unwrap_or_default().to_string();
        let name = payload.get("name").and_then(Value::as_str).map(str::to_string);
        let input = payload.get("input").and_then(Value::as_str).map(str::to_string);
        self.has_tool_calls = true;

        let mut out = Vec::new();
        let is_new = !self.tool_indices.contains_key(&tool_use_id);
        let index = *self.tool_indices.entry(tool_use_id.clone()).or_insert_with(|| {
            let index = self.next_tool_index;
            self.next_tool_index += 1;
            index
        });
        if is_new {
            out.push(StreamDelta {
                role: None,
                content: None,
                tool_calls: vec![StreamToolCallDelta {
                    index,
                    id: Some(tool_use_id),
                    name,
                    arguments_fragment: String::new(),
                }],
                finish_reason: None,
            });
        }
        if let Some(fragment) = input {
            out.push(StreamDelta {
                role: None,
                content: None,
                tool_calls: vec![StreamToolCallDelta {
                    index,
                    id: None,
                    name: None,
                    arguments_fragment: fragment,
                }],
                finish_reason: None,
            });
        }
        out
    }

    fn finish_delta(&mut self) -> StreamDelta {
        self.finish_emitted = true;
        StreamDelta {
            role: None,
            content: None,
            tool_calls: vec![],
            finish_reason: Some(if self.has_tool_calls { "tool_calls".to_string() } else { "stop".to_string() }),
        }
    }
}

/// Drives a Kiro upstream response end-to-end into OpenAI-shaped SSE bytes:
/// feeds each incoming byte chunk to an [`EventStreamParser`], renders every
/// decoded frame's [`StreamDelta`]s through [`crate::translate::stream_chunks::render_chunk`]
/// (target is always OpenAI — Kiro is only ever reached as an upstream
/// dialect, never a client-facing format), and emits `data: [DONE]` once the
/// upstream body ends. Kiro carries no token-count fields in its framing
/// (spec §4.3 names no usage schema for `meteringEvent`/`contextUsageEvent`),
/// so usage stays at its default zero value for these streams.
pub fn translate_kiro_stream<F>(
    response: reqwest::Response,
    model: String,
    on_complete: F,
) -> impl futures::Stream<Item = Result<bytes::Bytes, crate::error::GatewayError>>
where
    F: FnOnce(crate::formats::openai::TokenUsage) + Send + 'static,
{
    use futures::StreamExt;

    let upstream = response.bytes_stream();
    let state = (upstream, EventStreamParser::new(), KiroStreamTranslator::new(), false, false, Some(on_complete));

    futures::stream::unfold(state, move |(mut upstream, mut parser, mut translator, mut role_emitted, done, mut on_complete)| {
        let model = model.clone();
        async move {
            if done {
                return None;
            }
            loop {
                if let Ok(Some(frame)) = parser.next_frame() {
                    let deltas = translator.handle_frame(&frame);
                    if deltas.is_empty() {
                        continue;
                    }
                    let out = render_deltas(&deltas, &model, &mut role_emitted);
                    return Some((Ok(out), (upstream, parser, translator, role_emitted, false, on_complete)));
                }
                match upstream.next().await {
                    Some(Ok(bytes)) => {
                        parser.feed(&bytes);
                        continue;
                    }
                    Some(Err(err)) => {
                        return Some((Err(crate::error::GatewayError::Upstream(err.to_string())), (upstream, parser, translator, role_emitted, true, on_complete)));
                    }
                    None => {
                        let deltas = translator.flush_on_eof();
                        let mut out = render_deltas(&deltas, &model, &mut role_emitted);
                        out.extend_from_slice(b"data: [DONE]\n\n");
                        if let Some(cb) = on_complete.take() {
                            cb(crate::formats::openai::TokenUsage::default());
                        }
                        return Some((Ok(bytes::Bytes::from(out)), (upstream, parser, translator, role_emitted, true, on_complete)));
                    }
                }
            }
        }
    })
}

fn render_deltas(deltas: &[StreamDelta], model: &str, role_emitted: &mut bool) -> Vec<u8> {
    let mut out = Vec::new();
    for delta in deltas {
        for payload in crate::translate::stream_chunks::render_chunk(crate::formats::WireFormat::Openai, delta, model, role_emitted) {
            out.extend_from_slice(b"data: ");
            out.extend_from_slice(payload.to_string().as_bytes());
            out.extend_from_slice(b"\n\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_string_header(name: &str, value: &str) -> Vec<u8> {
        let mut out = vec![name.len() as u8];
        out.extend_from_slice(name.as_bytes());
        out.push(7u8);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn encode_frame(event_type: &str, payload: &Value) -> Vec<u8> {
        let headers = encode_string_header(":event-type", event_type);
        let payload_bytes = serde_json::to_vec(payload).unwrap();
        let total_len = PRELUDE_LEN + headers.len() + payload_bytes.len() + TAIL_CRC_LEN;
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&(total_len as u32).to_be_bytes());
        out.extend_from_slice(&(headers.len() as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // prelude CRC, unverified
        out.extend_from_slice(&headers);
        out.extend_from_slice(&payload_bytes);
        out.extend_from_slice(&0u32.to_be_bytes()); // tail CRC, unverified
        out
    }

    #[test]
    fn parses_single_frame_fed_whole() {
        let mut parser = EventStreamParser::new();
        parser.feed(&encode_frame("assistantResponseEvent", &serde_json::json!({"content": "hi"})));
        let frame = parser.next_frame().unwrap().unwrap();
        assert_eq!(frame.event_type.as_deref(), Some("assistantResponseEvent"));
        assert_eq!(frame.payload.get("content").and_then(Value::as_str), Some("hi"));
        assert!(parser.next_frame().unwrap().is_none());
    }

    #[test]
    fn buffers_frame_split_across_feeds() {
        let whole = encode_frame("codeEvent", &serde_json::json!({"content": "fn main() {}"}));
        let (first, second) = whole.split_at(whole.len() / 2);
        let mut parser = EventStreamParser::new();
        parser.feed(first);
        assert!(parser.next_frame().unwrap().is_none());
        parser.feed(second);
        let frame = parser.next_frame().unwrap().unwrap();
        assert_eq!(frame.event_type.as_deref(), Some("codeEvent"));
    }

    #[test]
    fn content_events_emit_role_once_then_bare_content() {
        let mut t = KiroStreamTranslator::new();
        let d1 = t.handle_frame(&Frame {
            event_type: Some("assistantResponseEvent".to_string()),
            payload: serde_json::json!({"content": "Hel"}),
        });
        let d2 = t.handle_frame(&Frame {
            event_type: Some("assistantResponseEvent".to_string()),
            payload: serde_json::json!({"content": "lo"}),
        });
        assert_eq!(d1[0].role, Some(Role::Assistant));
        assert_eq!(d2[0].role, None);
        assert_eq!(d2[0].content.as_deref(), Some("lo"));
    }

    #[test]
    fn duplicate_tool_use_id_emits_start_then_argument_fragment() {
        let mut t = KiroStreamTranslator::new();
        let first = t.handle_frame(&Frame {
            event_type: Some("toolUseEvent".to_string()),
            payload: serde_json::json!({"toolUseId": "t1", "name": "search"}),
        });
        let second = t.handle_frame(&Frame {
            event_type: Some("toolUseEvent".to_string()),
            payload: serde_json::json!({"toolUseId": "t1", "input": "{\"a\":1}"}),
        });
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].tool_calls[0].arguments_fragment, "");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tool_calls[0].arguments_fragment, "{\"a\":1}");
        assert_eq!(first[0].tool_calls[0].index, second[0].tool_calls[0].index);

        let stop = t.handle_frame(&Frame {
            event_type: Some("messageStopEvent".to_string()),
            payload: Value::Null,
        });
        assert_eq!(stop[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn metering_event_defers_finish_until_next_frame_or_eof() {
        let mut t = KiroStreamTranslator::new();
        let during = t.handle_frame(&Frame {
            event_type: Some("meteringEvent".to_string()),
            payload: Value::Null,
        });
        assert!(during.is_empty());
        let flushed = t.flush_on_eof();
        assert_eq!(flushed[0].finish_reason.as_deref(), Some("stop"));
    }
}
