//! Chat Core (spec §4.8): the single-account-attempt pipeline. Generalized
//! from the teacher's `commands/streaming_chat.rs` top-level
//! parse-build-stream-emit shape — there it is hardcoded to one
//! `OpenAICompatibleProvider`; here the same shape runs against whichever
//! [`crate::executors::Executor`] the [`crate::executors::registry`]
//! resolves for the attempt, with format detection/translation layered in
//! front and fallback classification left to the caller
//! ([`super::handler`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::credentials::{AuthType, CredentialSelector, CredentialStore, Connection};
use crate::error::GatewayError;
use crate::executors::{self, Executor, ExecuteOutcome, ExecutorError};
use crate::formats::{self, WireFormat};
use crate::formats::openai::{Role, StreamDelta, TokenUsage};
use crate::logging::{RequestLogger, RequestSnapshots};
use crate::state::{AppState, NodeConfig};
use crate::stream as stream_transform;
use crate::translate::{self, response_wire, tool_names};
use crate::usage::UsageRecorder;

use super::bypass;

/// Everything a chat attempt needs, shared across every account/model in
/// one incoming request (spec §5 "snapshots are taken on request entry to
/// avoid read-tearing" — `state`/`secrets` are cheap `Arc` clones of the
/// same snapshot for the whole request's lifetime).
pub struct ChatContext {
    pub state: Arc<AppState>,
    pub secrets: Arc<CredentialStore>,
    pub selector: Arc<CredentialSelector>,
    pub http: reqwest::Client,
    pub usage: Arc<UsageRecorder>,
    pub logger: Arc<RequestLogger>,
}

/// One account attempt's inputs (spec §4.7 "for each account attempt").
pub struct AttemptRequest<'a> {
    pub provider_id: &'a str,
    pub node: Option<NodeConfig>,
    pub connection: Connection,
    pub model: &'a str,
    pub raw_body: Value,
    pub has_anthropic_version_header: bool,
    pub user_agent: Option<&'a str>,
    pub stream: bool,
    pub request_id: String,
    pub cancel: CancellationToken,
}

/// Enough detail about a failed attempt for the Account Fallback Policy
/// (spec §4.5) to classify it, plus the already-formatted error to surface
/// if fallback says "fatal."
pub struct AttemptFailure {
    pub error: GatewayError,
    pub status: Option<u16>,
    pub retry_after_ms: Option<u64>,
    pub network_error: bool,
    pub client_disconnected: bool,
    pub refresh_already_attempted: bool,
}

pub enum AttemptOutcome {
    Success(Response),
    Failure(AttemptFailure),
}

/// Runs one account's full attempt (spec §4.8 steps 1-10).
pub async fn run_attempt(ctx: &ChatContext, req: AttemptRequest<'_>) -> AttemptOutcome {
    let client_format = formats::detect(&req.raw_body, req.has_anthropic_version_header);

    if bypass::is_probe(&req.raw_body, req.user_agent) {
        return AttemptOutcome::Success(synthetic_ok_response(client_format, req.model));
    }

    let executor = executors::registry::build(req.provider_id, req.node.as_ref());
    let provider_format = executors::registry::preferred_format_for(req.provider_id, req.node.as_ref());
    let target_format = ctx.state.format_override(req.provider_id, req.model).unwrap_or(provider_format);

    let mut snapshots = RequestSnapshots {
        raw_client_body: req.raw_body.clone(),
        source_format: client_format.to_string(),
        target_format: target_format.to_string(),
        ..Default::default()
    };

    let mut translated = match translate::translate_request(client_format, target_format, req.model, &req.raw_body) {
        Ok(body) => body,
        Err(err) => {
            snapshots.final_response_or_error = Value::String(err.to_string());
            ctx.logger.record_snapshots(&req.request_id, &snapshots);
            return AttemptOutcome::Failure(AttemptFailure {
                error: GatewayError::Translate(err),
                status: None,
                retry_after_ms: None,
                network_error: false,
                client_disconnected: false,
                refresh_already_attempted: false,
            });
        }
    };

    let tool_name_map = if tool_names::requires_restricted_names(target_format, req.connection.auth_type == AuthType::Oauth) {
        tool_names::sanitize_claude_tool_names(&mut translated)
    } else {
        HashMap::new()
    };

    let connection = req.connection.clone();
    let provider_label = req.provider_id.to_ascii_uppercase();

    ctx.usage.increment_in_flight(req.model);
    ctx.logger.append_line(req.model, &provider_label, &connection.id, 0, 0, "PENDING");

    let exec_result = tokio::select! {
        res = execute_with_reactive_refresh(ctx, executor.as_ref(), req.model, &translated, req.stream, connection.clone()) => res,
        () = req.cancel.cancelled() => {
            ctx.usage.decrement_in_flight(req.model);
            ctx.logger.append_line(req.model, &provider_label, &connection.id, 0, 0, "499");
            return AttemptOutcome::Failure(AttemptFailure {
                error: GatewayError::ClientDisconnected,
                status: None,
                retry_after_ms: None,
                network_error: false,
                client_disconnected: true,
                refresh_already_attempted: false,
            });
        }
    };

    let (outcome, refresh_already_attempted) = match exec_result {
        Ok(v) => v,
        Err(err) => {
            ctx.usage.decrement_in_flight(req.model);
            ctx.logger.append_line(req.model, &provider_label, &connection.id, 0, 0, "502");
            let network_error = matches!(&err, ExecutorError::Http(e) if e.is_connect() || e.is_timeout());
            snapshots.final_response_or_error = Value::String(err.to_string());
            ctx.logger.record_snapshots(&req.request_id, &snapshots);
            return AttemptOutcome::Failure(AttemptFailure {
                error: GatewayError::Executor(err),
                status: None,
                retry_after_ms: None,
                network_error,
                client_disconnected: false,
                refresh_already_attempted: false,
            });
        }
    };

    snapshots.translated_upstream_body = outcome.transformed_body.clone();
    snapshots.upstream_url = outcome.url.clone();
    snapshots.upstream_headers = redact_headers(&outcome.headers);

    if !outcome.response.status().is_success() {
        let status = outcome.response.status().as_u16();
        let headers = outcome.response.headers().clone();
        let body_text = outcome.response.text().await.unwrap_or_default();
        let (message, retry_after_ms) = parse_upstream_error(req.provider_id, status, &body_text, &headers);

        ctx.usage.decrement_in_flight(req.model);
        ctx.logger.append_line(req.model, &provider_label, &connection.id, 0, 0, &status.to_string());
        snapshots.final_response_or_error = Value::String(message.clone());
        ctx.logger.record_snapshots(&req.request_id, &snapshots);

        return AttemptOutcome::Failure(AttemptFailure {
            error: classify_status_error(status, &message),
            status: Some(status),
            retry_after_ms,
            network_error: false,
            client_disconnected: false,
            refresh_already_attempted,
        });
    }

    if target_format == WireFormat::Kiro {
        return AttemptOutcome::Success(build_kiro_response(ctx, req, outcome, client_format, provider_label, connection));
    }

    if req.stream {
        AttemptOutcome::Success(build_streaming_response(ctx, req, outcome, client_format, target_format, provider_label, connection, tool_name_map))
    } else {
        build_non_streaming_response(ctx, req, outcome, client_format, target_format, provider_label, connection, tool_name_map, &mut snapshots).await
    }
}

fn synthetic_ok_response(format: WireFormat, model: &str) -> Response {
    let delta = StreamDelta {
        role: Some(Role::Assistant),
        content: Some("OK".to_string()),
        tool_calls: Vec::new(),
        finish_reason: Some("stop".to_string()),
    };
    Json(response_wire::render_response(format, &delta, model)).into_response()
}

/// Reactive refresh-with-retry (spec §4.8 step 7): up to 3 refresh
/// attempts with short backoff on a 401/403, persisting new tokens and
/// re-executing exactly once on success. Returns whether a refresh was
/// ever attempted, which the caller feeds into the fallback policy's
/// `refresh_already_attempted` gate.
async fn execute_with_reactive_refresh(
    ctx: &ChatContext,
    executor: &dyn Executor,
    model: &str,
    translated: &Value,
    stream: bool,
    mut connection: Connection,
) -> std::result::Result<(ExecuteOutcome, bool), ExecutorError> {
    let outcome = executor.execute(&ctx.http, model, translated, stream, &connection).await?;
    let status = outcome.response.status().as_u16();
    if status != 401 && status != 403 {
        return Ok((outcome, false));
    }

    let mut refreshed = false;
    for attempt in 0..3u32 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(200 * u64::from(attempt))).await;
        }
        match executor.refresh_credentials(&connection, &ctx.http).await {
            Ok(Some(tokens)) => {
                if let Ok(secrets) = ctx.secrets.apply_refreshed_tokens(&connection.id, &tokens, now_secs()) {
                    connection.secrets = secrets;
                }
                refreshed = true;
                break;
            }
            _ => continue,
        }
    }

    if !refreshed {
        return Ok((outcome, true));
    }

    let retried = executor.execute(&ctx.http, model, translated, stream, &connection).await?;
    Ok((retried, true))
}

fn classify_status_error(status: u16, message: &str) -> GatewayError {
    match status {
        429 => GatewayError::RateLimited(message.to_string()),
        401 | 403 => GatewayError::Auth(message.to_string()),
        402 | 451 => GatewayError::QuotaExhausted(message.to_string()),
        s if (500..600).contains(&s) => GatewayError::Upstream(message.to_string()),
        _ => GatewayError::Upstream(format!("{status}: {message}")),
    }
}

/// Extracts a human-readable message and, where the provider supplies one,
/// a retry-after duration in milliseconds. Antigravity (Gemini-family)
/// encodes `retryDelay` inside the JSON error body instead of a header.
fn parse_upstream_error(provider_id: &str, status: u16, body_text: &str, headers: &reqwest::header::HeaderMap) -> (String, Option<u64>) {
    let parsed: Option<Value> = serde_json::from_str(body_text).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed: String = body_text.chars().take(200).collect();
            if trimmed.is_empty() { format!("upstream returned {status}") } else { trimmed }
        });

    let header_retry_ms = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1000);

    let body_retry_ms = if provider_id == "antigravity" || provider_id == "gemini" || provider_id == "google" {
        parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("details"))
            .and_then(Value::as_array)
            .and_then(|details| details.iter().find_map(|d| d.get("retryDelay").and_then(Value::as_str)))
            .and_then(parse_retry_delay_seconds)
    } else {
        None
    };

    (message, header_retry_ms.or(body_retry_ms))
}

/// Parses a Google-style `"12s"`/`"1.5s"` retry delay into milliseconds.
fn parse_retry_delay_seconds(raw: &str) -> Option<u64> {
    let numeric = raw.strip_suffix('s')?;
    let secs: f64 = numeric.parse().ok()?;
    Some((secs * 1000.0) as u64)
}

fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("x-api-key") || name.eq_ignore_ascii_case("x-goog-api-key") {
                (name.clone(), crate::logging::mask_key(value))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

async fn build_non_streaming_response(
    ctx: &ChatContext,
    req: AttemptRequest<'_>,
    outcome: ExecuteOutcome,
    client_format: WireFormat,
    target_format: WireFormat,
    provider_label: String,
    connection: Connection,
    tool_name_map: HashMap<String, String>,
    snapshots: &mut RequestSnapshots,
) -> AttemptOutcome {
    let body = match outcome.response.json::<Value>().await {
        Ok(v) => v,
        Err(err) => {
            ctx.usage.decrement_in_flight(req.model);
            ctx.logger.append_line(req.model, &provider_label, &connection.id, 0, 0, "502");
            return AttemptOutcome::Failure(AttemptFailure {
                error: GatewayError::Upstream(format!("invalid JSON response: {err}")),
                status: None,
                retry_after_ms: None,
                network_error: false,
                client_disconnected: false,
                refresh_already_attempted: false,
            });
        }
    };

    let (mut delta, usage) = response_wire::parse_response(target_format, &body);
    tool_names::restore_tool_names(&mut delta, &tool_name_map);
    let rendered = response_wire::render_response(client_format, &delta, req.model);

    persist_usage(ctx, req.provider_id, req.model, &connection.id, &usage);
    ctx.usage.decrement_in_flight(req.model);
    ctx.logger.append_line(req.model, &provider_label, &connection.id, usage.prompt, usage.completion, "200 OK");

    snapshots.final_response_or_error = rendered.clone();
    ctx.logger.record_snapshots(&req.request_id, snapshots);

    AttemptOutcome::Success(Json(rendered).into_response())
}

fn build_streaming_response(
    ctx: &ChatContext,
    req: AttemptRequest<'_>,
    outcome: ExecuteOutcome,
    client_format: WireFormat,
    target_format: WireFormat,
    provider_label: String,
    connection: Connection,
    tool_name_map: HashMap<String, String>,
) -> Response {
    let model = req.model.to_string();
    let usage_recorder = ctx.usage.clone();
    let state = ctx.state.clone();
    let provider_id = req.provider_id.to_string();
    let connection_id = connection.id.clone();
    let model_for_complete = model.clone();

    let on_complete = move |usage: TokenUsage| {
        let pricing = state.pricing_for(&provider_id, &model_for_complete);
        if let Err(err) = usage_recorder.record(&provider_id, &model_for_complete, &connection_id, &usage, pricing.as_ref()) {
            tracing::warn!(error = %err, "failed to persist streamed usage entry");
        }
        usage_recorder.decrement_in_flight(&model_for_complete);
    };

    let translated: std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>> = if client_format == target_format && tool_name_map.is_empty() {
        Box::pin(stream_transform::passthrough_stream(outcome.response, target_format, on_complete))
    } else {
        Box::pin(stream_transform::translate_stream(outcome.response, target_format, client_format, model, tool_name_map, on_complete))
    };

    let model_log = req.model.to_string();
    let logger = ctx.logger.clone();
    let connection_id_log = connection.id.clone();
    let guarded = with_disconnect_guard(translated, move |logged| {
        if !logged {
            logger.append_line(&model_log, &provider_label, &connection_id_log, 0, 0, "499");
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .body(Body::from_stream(guarded))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn build_kiro_response(ctx: &ChatContext, req: AttemptRequest<'_>, outcome: ExecuteOutcome, _client_format: WireFormat, provider_label: String, connection: Connection) -> Response {
    let model = req.model.to_string();
    let usage_recorder = ctx.usage.clone();
    let state = ctx.state.clone();
    let provider_id = req.provider_id.to_string();
    let connection_id = connection.id.clone();
    let model_for_complete = model.clone();

    let on_complete = move |usage: TokenUsage| {
        let pricing = state.pricing_for(&provider_id, &model_for_complete);
        if let Err(err) = usage_recorder.record(&provider_id, &model_for_complete, &connection_id, &usage, pricing.as_ref()) {
            tracing::warn!(error = %err, "failed to persist kiro usage entry");
        }
        usage_recorder.decrement_in_flight(&model_for_complete);
    };

    let translated = executors::kiro::translate_kiro_stream(outcome.response, model, on_complete);

    let model_log = req.model.to_string();
    let logger = ctx.logger.clone();
    let connection_id_log = connection.id.clone();
    let guarded = with_disconnect_guard(translated, move |logged| {
        if !logged {
            logger.append_line(&model_log, &provider_label, &connection_id_log, 0, 0, "499");
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .body(Body::from_stream(guarded))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn persist_usage(ctx: &ChatContext, provider_id: &str, model: &str, connection_id: &str, usage: &TokenUsage) {
    let pricing = ctx.state.pricing_for(provider_id, model);
    if let Err(err) = ctx.usage.record(provider_id, model, connection_id, usage, pricing.as_ref()) {
        tracing::warn!(error = %err, "failed to persist usage entry");
    }
}

/// Wraps a body stream so a downstream disconnect (the stream dropped
/// before yielding `None`) runs `on_drop(false)`; reaching the natural end
/// of the stream runs it with `true` instead, a no-op for callers that
/// only care about the abnormal case (spec §4.9 "disconnect detection").
fn with_disconnect_guard<S>(inner: S, on_drop: impl FnOnce(bool) + Send + 'static) -> impl Stream<Item = S::Item> + Send
where
    S: Stream + Send + 'static,
{
    struct Guard<F: FnOnce(bool)> {
        callback: Option<F>,
        finished: bool,
    }
    impl<F: FnOnce(bool)> Drop for Guard<F> {
        fn drop(&mut self) {
            if let Some(cb) = self.callback.take() {
                cb(self.finished);
            }
        }
    }

    let mut inner = Box::pin(inner);
    let mut guard = Guard {
        callback: Some(on_drop),
        finished: false,
    };
    futures::stream::poll_fn(move |cx| {
        let poll = inner.as_mut().poll_next(cx);
        if matches!(poll, std::task::Poll::Ready(None)) {
            guard.finished = true;
        }
        poll
    })
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_delay_parses_fractional_seconds() {
        assert_eq!(parse_retry_delay_seconds("1.5s"), Some(1500));
        assert_eq!(parse_retry_delay_seconds("12s"), Some(12_000));
        assert_eq!(parse_retry_delay_seconds("garbage"), None);
    }

    #[test]
    fn classify_status_error_maps_rate_limit_and_quota() {
        assert!(matches!(classify_status_error(429, "x"), GatewayError::RateLimited(_)));
        assert!(matches!(classify_status_error(402, "x"), GatewayError::QuotaExhausted(_)));
        assert!(matches!(classify_status_error(503, "x"), GatewayError::Upstream(_)));
    }

    #[test]
    fn redact_headers_masks_auth_header_values() {
        let headers = vec![("Authorization".to_string(), "Bearer sk-verysecret1234".to_string()), ("Content-Type".to_string(), "application/json".to_string())];
        let redacted = redact_headers(&headers);
        assert_eq!(redacted[1].1, "application/json");
        assert!(redacted[0].1.ends_with("1234"));
        assert!(!redacted[0].1.contains("verysecret"));
    }
}
