//! Credential Selector (spec §4.4): ordered account iteration, eligibility
//! filtering, and proactive refresh with coalescing of concurrent refreshes
//! for the same connection (spec §9 "Refresh coalescing" — a per-connection
//! single-slot future collapsed via an async mutex, in the same spirit as
//! the teacher's `ai/providers/router.rs` ordered-fallback walk, generalized
//! from a static priority list to live connection state).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::error::CredentialError;
use super::oauth::{self, ProviderKind};
use super::store::CredentialStore;
use super::types::Connection;
use crate::state::AppState;

const PROACTIVE_REFRESH_BUFFER_SECS: i64 = 300;

pub struct CredentialSelector {
    state: Arc<AppState>,
    secrets: Arc<CredentialStore>,
    http: reqwest::Client,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialSelector {
    pub fn new(state: Arc<AppState>, secrets: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            state,
            secrets,
            http,
            refresh_locks: DashMap::new(),
        }
    }

    /// Returns the best eligible connection for `provider_id`, or `None` if
    /// every connection is on cooldown, inactive, or excluded. `exclude`
    /// names a single already-tried connection id; callers walking a full
    /// excluded set filter the candidate list themselves before/with this
    /// call (see [`select_excluding`](Self::select_excluding)).
    pub async fn select(&self, provider_id: &str, exclude: Option<&str>) -> Result<Option<Connection>, CredentialError> {
        self.select_excluding(provider_id, exclude.into_iter().collect::<Vec<_>>().as_slice()).await
    }

    /// Same as [`select`](Self::select) but excludes every id in
    /// `excluded`, not just the most recent one — needed so a connection
    /// whose cooldown (millisecond-precision) hasn't yet elapsed isn't
    /// re-selected on a later loop iteration just because it's no longer
    /// the last-excluded id (spec §4.7: "excluding each one that fails ...
    /// until none remain").
    pub async fn select_excluding(&self, provider_id: &str, excluded: &[&str]) -> Result<Option<Connection>, CredentialError> {
        let now_ms = now_ms();
        let now = now_secs();
        let Some(mut connection) = self
            .state
            .list_connections(Some(provider_id))
            .into_iter()
            .find(|c| c.is_eligible(now_ms, None) && !excluded.contains(&c.id.as_str()))
        else {
            return Ok(None);
        };
        connection.secrets = self.secrets.read_secrets(&connection.id)?;

        if connection.secrets.needs_refresh(now, PROACTIVE_REFRESH_BUFFER_SECS) {
            if let Some(kind) = provider_kind_for(provider_id) {
                return self.refresh_and_reload(connection, kind, now).await;
            }
        }
        Ok(Some(connection))
    }

    async fn refresh_and_reload(&self, connection: Connection, kind: ProviderKind, now: i64) -> Result<Option<Connection>, CredentialError> {
        let lock = self.refresh_locks.entry(connection.id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = lock.lock().await;

        // Re-read: another caller may have completed the refresh while we
        // waited on the lock.
        let mut fresh = connection;
        fresh.secrets = self.secrets.read_secrets(&fresh.id)?;
        if !fresh.secrets.needs_refresh(now, PROACTIVE_REFRESH_BUFFER_SECS) {
            return Ok(Some(fresh));
        }

        match oauth::refresh(kind, &fresh, &self.http).await? {
            Some(tokens) => {
                fresh.secrets = self.secrets.apply_refreshed_tokens(&fresh.id, &tokens, now)?;
                Ok(Some(fresh))
            }
            // Refresh failed; return the connection unchanged — the executor
            // will hit 401/403 and drive the reactive fallback path instead.
            None => Ok(Some(fresh)),
        }
    }
}

fn provider_kind_for(provider_id: &str) -> Option<ProviderKind> {
    match provider_id {
        "claude" | "anthropic" => Some(ProviderKind::Anthropic),
        "codex" | "openai-codex" => Some(ProviderKind::OpenaiCodex),
        "qwen" => Some(ProviderKind::Qwen),
        "gemini" | "google" | "antigravity" => Some(ProviderKind::Google),
        "iflow" => Some(ProviderKind::Iflow),
        "kiro" => Some(ProviderKind::Kiro),
        "kiro-social" => Some(ProviderKind::KiroSocial),
        _ => None,
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::types::{AuthType, Secrets, TestStatus};
    use tempfile::tempdir;

    fn sample(id: &str, priority: i64, cooldown_until: i64) -> Connection {
        Connection {
            id: id.to_string(),
            provider_id: "openai".to_string(),
            auth_type: AuthType::Apikey,
            display_name: id.to_string(),
            priority,
            global_priority: None,
            default_model: None,
            secrets: Secrets {
                api_key: Some("sk-test".to_string()),
                ..Default::default()
            },
            test_status: TestStatus::Unknown,
            last_error: None,
            last_error_at: None,
            cooldown_until,
            consecutive_failures: 0,
            is_active: true,
            created_at: 0,
        }
    }

    fn harness(dir: &tempfile::TempDir) -> (Arc<AppState>, Arc<CredentialStore>) {
        let state = Arc::new(AppState::open(dir.path().join("local.json")).unwrap());
        let secrets = Arc::new(CredentialStore::open(&dir.path().join("secrets.sqlite3")).unwrap());
        (state, secrets)
    }

    #[tokio::test]
    async fn selects_lowest_priority_eligible_connection() {
        let dir = tempdir().unwrap();
        let (state, secrets) = harness(&dir);
        state.upsert_connection(sample("low", 5, 0)).unwrap();
        state.upsert_connection(sample("high", 1, 0)).unwrap();
        let selector = CredentialSelector::new(state, secrets, reqwest::Client::new());
        let picked = selector.select("openai", None).await.unwrap().unwrap();
        assert_eq!(picked.id, "high");
    }

    #[tokio::test]
    async fn skips_connections_on_cooldown() {
        let dir = tempdir().unwrap();
        let (state, secrets) = harness(&dir);
        state.upsert_connection(sample("cooling", 1, i64::MAX)).unwrap();
        state.upsert_connection(sample("ready", 2, 0)).unwrap();
        let selector = CredentialSelector::new(state, secrets, reqwest::Client::new());
        let picked = selector.select("openai", None).await.unwrap().unwrap();
        assert_eq!(picked.id, "ready");
    }

    #[tokio::test]
    async fn returns_none_when_all_excluded_or_cooling() {
        let dir = tempdir().unwrap();
        let (state, secrets) = harness(&dir);
        state.upsert_connection(sample("only", 1, 0)).unwrap();
        let selector = CredentialSelector::new(state, secrets, reqwest::Client::new());
        let picked = selector.select("openai", Some("only")).await.unwrap();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn select_excluding_skips_every_id_in_the_set_not_just_the_last() {
        let dir = tempdir().unwrap();
        let (state, secrets) = harness(&dir);
        state.upsert_connection(sample("a", 1, 0)).unwrap();
        state.upsert_connection(sample("b", 2, 0)).unwrap();
        state.upsert_connection(sample("c", 3, 0)).unwrap();
        let selector = CredentialSelector::new(state, secrets, reqwest::Client::new());
        let picked = selector.select_excluding("openai", &["a", "b"]).await.unwrap().unwrap();
        assert_eq!(picked.id, "c");
    }

    #[tokio::test]
    async fn cooldown_under_one_second_still_excludes_the_connection() {
        let dir = tempdir().unwrap();
        let (state, secrets) = harness(&dir);
        let cooldown_until_ms = now_ms() + 500;
        state.upsert_connection(sample("cooling", 1, cooldown_until_ms)).unwrap();
        state.upsert_connection(sample("ready", 2, 0)).unwrap();
        let selector = CredentialSelector::new(state, secrets, reqwest::Client::new());
        let picked = selector.select("openai", None).await.unwrap().unwrap();
        assert_eq!(picked.id, "ready");
    }

    #[tokio::test]
    async fn picked_connection_carries_secrets() {
        let dir = tempdir().unwrap();
        let (state, secrets) = harness(&dir);
        state.upsert_connection(sample("c1", 0, 0)).unwrap();
        secrets
            .write_secrets(
                "c1",
                &Secrets {
                    api_key: Some("sk-live".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let selector = CredentialSelector::new(state, secrets, reqwest::Client::new());
        let picked = selector.select("openai", None).await.unwrap().unwrap();
        assert_eq!(picked.secrets.api_key.as_deref(), Some("sk-live"));
    }
}
