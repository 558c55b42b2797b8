//! HTTP route handlers (spec §6 "External interfaces"). Each chat-shaped
//! route does the minimum format-specific work (stream-flag extraction,
//! Anthropic-version header check) before handing off to
//! [`crate::chat::handler::handle`], which does everything else. The
//! config routes are thin CRUD over [`crate::state::AppState`] — spec §1
//! treats the storage layer itself as an external collaborator, so these
//! handlers stay a pass-through rather than growing their own business
//! logic.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::chat::{self, ChatContext, IncomingRequest};
use crate::credentials::Connection;
use crate::error::GatewayError;
use crate::state::{NodeConfig, PricingEntry};

pub type GatewayState = Arc<ChatContext>;

fn parse_body(bytes: &Bytes) -> Result<Value, Response> {
    serde_json::from_slice(bytes).map_err(|err| GatewayError::MalformedBody(err.to_string()).into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn stream_flag(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn client_key(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string).or_else(|| Some(v.to_string())))
        .or_else(|| header_str(headers, "x-api-key").map(str::to_string))
        .or_else(|| header_str(headers, "x-goog-api-key").map(str::to_string))
}

/// `POST /v1/chat/completions` (OpenAI Chat Completions).
pub async fn chat_completions(State(ctx): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw_body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let stream = stream_flag(&raw_body);
    chat::handle(
        ctx,
        IncomingRequest {
            endpoint: "/v1/chat/completions",
            stream,
            has_anthropic_version_header: header_str(&headers, "anthropic-version").is_some(),
            user_agent: header_str(&headers, "user-agent").map(str::to_string),
            client_key: client_key(&headers),
            raw_body,
        },
    )
    .await
}

/// `POST /v1/messages` (Anthropic Messages).
pub async fn messages(State(ctx): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw_body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let stream = stream_flag(&raw_body);
    chat::handle(
        ctx,
        IncomingRequest {
            endpoint: "/v1/messages",
            stream,
            has_anthropic_version_header: header_str(&headers, "anthropic-version").is_some(),
            user_agent: header_str(&headers, "user-agent").map(str::to_string),
            client_key: client_key(&headers),
            raw_body,
        },
    )
    .await
}

/// `POST /v1/responses` (OpenAI Responses API).
pub async fn responses(State(ctx): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw_body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let stream = stream_flag(&raw_body);
    chat::handle(
        ctx,
        IncomingRequest {
            endpoint: "/v1/responses",
            stream,
            has_anthropic_version_header: false,
            user_agent: header_str(&headers, "user-agent").map(str::to_string),
            client_key: client_key(&headers),
            raw_body,
        },
    )
    .await
}

/// `POST /v1beta/models/{model}:generateContent` and its
/// `:streamGenerateContent` variant (Gemini). The streaming flag comes from
/// the URL suffix, not the body, per spec §4.1/§6.
pub async fn generate_content(State(ctx): State<GatewayState>, Path(model_and_action): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    let (model, stream) = match model_and_action.split_once(':') {
        Some((model, "streamGenerateContent")) => (model.to_string(), true),
        Some((model, "generateContent")) => (model.to_string(), false),
        Some((model, _)) => (model.to_string(), false),
        None => (model_and_action, false),
    };

    let mut raw_body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Some(obj) = raw_body.as_object_mut() {
        obj.entry("model").or_insert_with(|| Value::String(model));
    }

    chat::handle(
        ctx,
        IncomingRequest {
            endpoint: "/v1beta/models/:generateContent",
            stream,
            has_anthropic_version_header: false,
            user_agent: header_str(&headers, "user-agent").map(str::to_string),
            client_key: client_key(&headers),
            raw_body,
        },
    )
    .await
}

/// `GET /v1/models`: every model known through an active connection,
/// merged by alias (spec §6).
pub async fn list_models(State(ctx): State<GatewayState>) -> Json<Value> {
    let connections = ctx.state.list_connections(None);
    let mut models: Vec<Value> = connections
        .iter()
        .filter(|c| c.is_active)
        .map(|c| {
            serde_json::json!({
                "id": format!("{}/{}", c.provider_id, c.default_model.clone().unwrap_or_default()),
                "provider": c.provider_id,
                "connection_id": c.id,
            })
        })
        .collect();
    models.extend(ctx.state.list_aliases().into_iter().map(|(alias, target)| {
        serde_json::json!({"id": alias, "target": target})
    }));
    Json(serde_json::json!({"data": models}))
}

// ── Config CRUD: connections ────────────────────────────────────────────

pub async fn list_connections(State(ctx): State<GatewayState>) -> Json<Vec<Connection>> {
    Json(ctx.state.list_connections(None))
}

pub async fn upsert_connection(State(ctx): State<GatewayState>, Json(connection): Json<Connection>) -> Response {
    match ctx.state.upsert_connection(connection) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => GatewayError::Storage(err).into_response(),
    }
}

pub async fn delete_connection(State(ctx): State<GatewayState>, Path(id): Path<String>) -> Response {
    match ctx.state.delete_connection(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => GatewayError::Storage(err).into_response(),
    }
}

// ── Config CRUD: nodes, aliases, combos, pricing, settings ──────────────

pub async fn list_nodes(State(ctx): State<GatewayState>) -> Json<Vec<NodeConfig>> {
    Json(ctx.state.list_nodes())
}

pub async fn upsert_node(State(ctx): State<GatewayState>, Json(node): Json<NodeConfig>) -> Response {
    match ctx.state.upsert_node(node) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => GatewayError::Storage(err).into_response(),
    }
}

pub async fn list_aliases(State(ctx): State<GatewayState>) -> Json<Value> {
    Json(serde_json::to_value(ctx.state.list_aliases().into_iter().collect::<std::collections::HashMap<_, _>>()).unwrap_or_default())
}

pub async fn set_alias(State(ctx): State<GatewayState>, Path(name): Path<String>, Json(target): Json<String>) -> Response {
    match ctx.state.set_alias(name, target) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => GatewayError::Storage(err).into_response(),
    }
}

pub async fn list_combos(State(ctx): State<GatewayState>) -> Json<Value> {
    Json(serde_json::to_value(ctx.state.list_combos().into_iter().collect::<std::collections::HashMap<_, _>>()).unwrap_or_default())
}

pub async fn set_combo(State(ctx): State<GatewayState>, Path(name): Path<String>, Json(models): Json<Vec<String>>) -> Response {
    match ctx.state.set_combo(name, models) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => GatewayError::Storage(err).into_response(),
    }
}

pub async fn set_pricing(State(ctx): State<GatewayState>, Path(key): Path<String>, Json(entry): Json<PricingEntry>) -> Response {
    match ctx.state.set_pricing(key, entry) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => GatewayError::Storage(err).into_response(),
    }
}

pub async fn get_settings(State(ctx): State<GatewayState>) -> Json<crate::state::Settings> {
    Json(ctx.state.settings())
}

pub async fn health() -> &'static str {
    "ok"
}
