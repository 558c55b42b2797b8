//! Chat Handler (spec §4.7): the single entry point every wire-format HTTP
//! route funnels into. Parses the body far enough to find `model`, expands
//! aliases/combos, and drives the [`crate::fallback::combo`] orchestrator
//! over [`super::core::run_attempt`] — one call per (model, account) pair —
//! applying the [`crate::fallback`] policy between attempts. Generalized
//! from the teacher's `commands/streaming_chat.rs` top-level shape, which
//! only ever had one provider and therefore no alias/combo/account loop at
//! all.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::fallback::{self, combo, ErrorCategory, Outcome};

use super::core::{AttemptOutcome, AttemptRequest, ChatContext};

/// Per-request details the HTTP layer has already extracted before handing
/// off to the handler: which header carried `anthropic-version`, the
/// client's `User-Agent`, and any client-supplied key worth logging in
/// masked form (spec §4.7: "log the request ... masked key").
pub struct IncomingRequest {
    pub endpoint: &'static str,
    pub raw_body: Value,
    pub stream: bool,
    pub has_anthropic_version_header: bool,
    pub user_agent: Option<String>,
    pub client_key: Option<String>,
}

/// Entry point for every `/v1/chat/completions`, `/v1/messages`,
/// `/v1beta/.../generateContent`, and `/v1/responses` route (spec §6).
pub async fn handle(ctx: Arc<ChatContext>, req: IncomingRequest) -> Response {
    let Some(model_field) = req.raw_body.get("model").and_then(Value::as_str).map(str::to_string) else {
        return GatewayError::MissingModel.into_response();
    };

    if let Some(err) = reject_empty_messages(&req.raw_body) {
        return err.into_response();
    }

    log_incoming(&req, &model_field);

    let models = ctx.state.resolve_models(&model_field);

    let result = combo::run(&models, |model| {
        let ctx = ctx.clone();
        let raw_body = req.raw_body.clone();
        let user_agent = req.user_agent.clone();
        let stream = req.stream;
        let has_anthropic_version_header = req.has_anthropic_version_header;
        async move { attempt_model(&ctx, model, raw_body, stream, has_anthropic_version_header, user_agent.as_deref()).await }
    })
    .await;

    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Resolves one combo entry (an alias or raw `provider/model` string) and
/// walks that model's eligible accounts in priority order, excluding each
/// one that fails with a fallback-eligible error until none remain.
async fn attempt_model(
    ctx: &ChatContext,
    model_entry: &str,
    raw_body: Value,
    stream: bool,
    has_anthropic_version_header: bool,
    user_agent: Option<&str>,
) -> combo::ComboAttempt<Response> {
    let (provider_id, model) = match ctx.state.resolve_alias(model_entry) {
        Ok(pair) => pair,
        Err(err) => return combo::ComboAttempt::Fatal(GatewayError::UnknownAlias(err.to_string())),
    };
    let node = ctx.state.get_node(&provider_id);

    let mut excluded: Vec<String> = Vec::new();
    let mut last_retryable: Option<GatewayError> = None;

    loop {
        let excluded_refs: Vec<&str> = excluded.iter().map(String::as_str).collect();
        let connection = match ctx.selector.select_excluding(&provider_id, &excluded_refs).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                return combo::ComboAttempt::Retryable(last_retryable.unwrap_or_else(|| GatewayError::NoEligibleCredential(provider_id.clone())));
            }
            Err(err) => return combo::ComboAttempt::Fatal(GatewayError::Credential(err)),
        };

        let request_id = Uuid::new_v4().to_string();
        let attempt = AttemptRequest {
            provider_id: &provider_id,
            node: node.clone(),
            connection: connection.clone(),
            model: &model,
            raw_body: raw_body.clone(),
            has_anthropic_version_header,
            user_agent,
            stream,
            request_id,
            cancel: CancellationToken::new(),
        };

        match super::core::run_attempt(ctx, attempt).await {
            AttemptOutcome::Success(response) => {
                let _ = ctx.state.clear_error(&connection.id);
                return combo::ComboAttempt::Success(response);
            }
            AttemptOutcome::Failure(failure) => {
                let classification = fallback::classify(&Outcome {
                    status: failure.status,
                    retry_after_ms: failure.retry_after_ms,
                    consecutive_failures: connection.consecutive_failures,
                    refresh_already_attempted: failure.refresh_already_attempted,
                    network_error: failure.network_error,
                    client_disconnected: failure.client_disconnected,
                });

                if !classification.should_fallback {
                    return combo::ComboAttempt::Fatal(failure.error);
                }

                let cooldown_until_ms = now_ms() + classification.cooldown_ms as i64;
                let _ = ctx.state.mark_unavailable(&connection.id, cooldown_until_ms, &failure.error.to_string(), now_secs());

                if classification.category != ErrorCategory::ClientDisconnected {
                    last_retryable = Some(failure.error);
                } else {
                    // The client is gone; no later model in the combo can
                    // deliver a response either, so surface immediately
                    // rather than burning more upstream calls.
                    return combo::ComboAttempt::Fatal(GatewayError::ClientDisconnected);
                }

                excluded.push(connection.id);
                continue;
            }
        }
    }
}

fn reject_empty_messages(body: &Value) -> Option<GatewayError> {
    let empty_array = |key: &str| body.get(key).and_then(Value::as_array).is_some_and(Vec::is_empty);
    if empty_array("messages") || empty_array("contents") || empty_array("input") {
        return Some(GatewayError::MalformedBody("messages list is empty".to_string()));
    }
    None
}

fn log_incoming(req: &IncomingRequest, model: &str) {
    let message_count = req.raw_body.get("messages").and_then(Value::as_array).map_or(0, Vec::len);
    let tool_count = req.raw_body.get("tools").and_then(Value::as_array).map_or(0, Vec::len);
    let masked_key = req.client_key.as_deref().map(crate::logging::mask_key);
    tracing::info!(
        endpoint = req.endpoint,
        model,
        message_count,
        tool_count,
        client_key = masked_key.as_deref().unwrap_or("-"),
        "chat request received"
    );
}

fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Epoch milliseconds, matching `Connection::cooldown_until`'s unit (spec
/// §4.5/§8: sub-second 429 backoffs must not truncate to zero).
fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_messages_array_is_rejected() {
        let body = json!({"model": "gpt-4o", "messages": []});
        assert!(matches!(reject_empty_messages(&body), Some(GatewayError::MalformedBody(_))));
    }

    #[test]
    fn non_empty_messages_array_passes() {
        let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        assert!(reject_empty_messages(&body).is_none());
    }
}
