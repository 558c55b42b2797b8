//! Provider Executor (Strategy) — spec §4.3.
//!
//! Every supported provider is modeled as a value implementing [`Executor`]
//! (spec §9 "Provider polymorphism": capability-set dispatch via a registry,
//! not inheritance), grounded on the teacher's `ai/provider.rs::LLMProvider`
//! trait shape. [`registry::build`] is the dispatch point keyed by provider
//! id, generalized from the teacher's single `OpenAICompatibleProvider` to
//! the full per-family URL/header table spec §4.3 describes, plus a
//! genuinely distinct [`kiro::KiroExecutor`] for AWS CodeWhisperer's binary
//! EventStream dialect.

pub mod default_executor;
pub mod kiro;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::credentials::{Connection, CredentialError, RefreshedTokens};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("malformed eventstream frame: {0}")]
    Frame(String),
}

/// Outcome of one upstream call (spec §4.3 `execute()` contract): the raw
/// response plus everything the request logger's "upstream URL/headers"
/// snapshot needs.
pub struct ExecuteOutcome {
    pub response: reqwest::Response,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub transformed_body: Value,
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn build_url(&self, model: &str, stream: bool) -> String;

    fn build_headers(&self, connection: &Connection, stream: bool) -> Vec<(String, String)>;

    /// Per-provider request-shape tweaks layered on top of the already
    /// wire-format-translated body (e.g. OpenAI's o1-model parameter
    /// stripping). Default: substitute `model`/`stream` and otherwise pass
    /// the body through unchanged.
    fn transform_request(&self, model: &str, body: &Value, stream: bool, _connection: &Connection) -> Value {
        let mut out = body.clone();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("model".to_string(), Value::String(model.to_string()));
            obj.insert("stream".to_string(), Value::Bool(stream));
        }
        out
    }

    async fn execute(
        &self,
        http: &reqwest::Client,
        model: &str,
        body: &Value,
        stream: bool,
        connection: &Connection,
    ) -> Result<ExecuteOutcome, ExecutorError>;

    /// Issue the provider's OAuth refresh call. `Ok(None)` both when the
    /// provider has no refresh mechanism (API-key auth) and when the
    /// upstream call itself returned non-2xx (spec §4.3).
    async fn refresh_credentials(&self, connection: &Connection, http: &reqwest::Client) -> Result<Option<RefreshedTokens>, ExecutorError>;
}
