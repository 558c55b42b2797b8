//! Connection (account) and provider-profile types (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::formats::WireFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Apikey,
    Oauth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Unknown,
    Active,
    Error,
}

/// Secret material for one connection. Never serialized into an HTTP
/// response; only ever read from the keyring/fallback blob and handed to
/// an executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secrets {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Provider-specific extras: `profileArn`, `baseUrl`, `apiType`, etc.
    pub provider_data: Option<Value>,
    pub expires_at: Option<i64>,
}

impl Secrets {
    /// True when the access token expires within `buffer_secs` of `now`
    /// (spec §4.4's 5-minute proactive-refresh buffer).
    pub fn needs_refresh(&self, now: i64, buffer_secs: i64) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(exp)) => exp - now < buffer_secs,
            _ => false,
        }
    }
}

/// A stored provider connection (spec §3 "Provider connection (account)").
///
/// `secrets` never touches `local.json`: it is skipped on both serialize and
/// deserialize (spec §6 stores connections there, but actual secret
/// material lives in the keyring-backed [`crate::credentials::CredentialStore`]
/// per spec §3's "secrets never leave the boundary" invariant) and is
/// attached at read time by the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub provider_id: String,
    pub auth_type: AuthType,
    pub display_name: String,
    pub priority: i64,
    pub global_priority: Option<i64>,
    pub default_model: Option<String>,
    #[serde(skip)]
    pub secrets: Secrets,
    pub test_status: TestStatus,
    pub last_error: Option<String>,
    pub last_error_at: Option<i64>,
    /// Epoch milliseconds before which the selector will not return this
    /// connection (spec §4.5/§8: a 429 with no `retry-after` cools down for
    /// `min(2^n, 120_000)` *milliseconds*, so this needs millisecond
    /// precision — a seconds-granularity field would truncate every
    /// sub-second backoff to zero and make the just-failed account
    /// immediately eligible again).
    pub cooldown_until: i64,
    /// Consecutive failed calls since the last success, feeding the
    /// fallback policy's exponential 429 backoff (spec §4.5).
    #[serde(default)]
    pub consecutive_failures: u32,
    pub is_active: bool,
    pub created_at: i64,
}

impl Connection {
    /// `now_ms` must be epoch milliseconds, matching `cooldown_until`'s unit.
    pub fn is_eligible(&self, now_ms: i64, exclude: Option<&str>) -> bool {
        self.is_active && exclude != Some(self.id.as_str()) && self.cooldown_until <= now_ms
    }
}

/// Static per-provider config (spec §3 "Provider").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub base_urls: Vec<String>,
    pub preferred_format: WireFormat,
}
