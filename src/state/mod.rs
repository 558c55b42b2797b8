//! On-disk application state: connections, nodes, aliases, combos, pricing,
//! and settings (spec §3/§6, `local.json`). Connection *secrets* live
//! elsewhere ([`crate::credentials::CredentialStore`]); this module only
//! ever sees the non-secret fields spec §6 describes as living in the JSON
//! file, atomically saved the way [`crate::config::loader`] saves
//! `config.toml`.

pub mod error;
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

pub use error::StateError;
pub use schema::{LocalState, NodeConfig, PricingEntry, Settings};

use crate::credentials::Connection;

pub fn default_state_path() -> Result<PathBuf, String> {
    crate::config::app_dir().map(|d| d.join("local.json"))
}

pub struct AppState {
    path: PathBuf,
    inner: RwLock<LocalState>,
}

impl AppState {
    pub fn open(path: PathBuf) -> Result<Self, StateError> {
        let inner = load(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(inner),
        })
    }

    pub fn save(&self) -> Result<(), StateError> {
        let snapshot = self.inner.read().clone();
        save(&self.path, &snapshot)
    }

    // ── Connections ────────────────────────────────────────────────────

    pub fn list_connections(&self, provider_id: Option<&str>) -> Vec<Connection> {
        let state = self.inner.read();
        let mut connections: Vec<Connection> = state
            .connections
            .iter()
            .filter(|c| provider_id.map_or(true, |p| c.provider_id == p))
            .cloned()
            .collect();
        connections.sort_by_key(|c| (c.global_priority.unwrap_or(i64::MAX), c.priority, c.created_at));
        connections
    }

    pub fn get_connection(&self, id: &str) -> Result<Connection, StateError> {
        self.inner
            .read()
            .connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StateError::ConnectionNotFound(id.to_string()))
    }

    pub fn upsert_connection(&self, connection: Connection) -> Result<(), StateError> {
        {
            let mut state = self.inner.write();
            if let Some(existing) = state.connections.iter_mut().find(|c| c.id == connection.id) {
                *existing = connection;
            } else {
                state.connections.push(connection);
            }
        }
        self.save()
    }

    pub fn delete_connection(&self, id: &str) -> Result<(), StateError> {
        {
            let mut state = self.inner.write();
            state.connections.retain(|c| c.id != id);
        }
        self.save()
    }

    /// Applies spec §4.5's fallback cooldown: advances `cooldown_until`
    /// monotonically and records the truncated error. `cooldown_until` is
    /// epoch milliseconds (matching `Connection::cooldown_until`'s unit);
    /// `now` is epoch seconds, used only for the `last_error_at` timestamp.
    pub fn mark_unavailable(&self, id: &str, cooldown_until: i64, error_message: &str, now: i64) -> Result<(), StateError> {
        {
            let mut state = self.inner.write();
            let connection = state
                .connections
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| StateError::ConnectionNotFound(id.to_string()))?;
            connection.test_status = crate::credentials::TestStatus::Error;
            connection.last_error = Some(error_message.chars().take(100).collect());
            connection.last_error_at = Some(now);
            connection.cooldown_until = connection.cooldown_until.max(cooldown_until);
            connection.consecutive_failures = connection.consecutive_failures.saturating_add(1);
        }
        self.save()
    }

    pub fn clear_error(&self, id: &str) -> Result<(), StateError> {
        {
            let mut state = self.inner.write();
            let connection = state
                .connections
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| StateError::ConnectionNotFound(id.to_string()))?;
            connection.test_status = crate::credentials::TestStatus::Active;
            connection.cooldown_until = 0;
            connection.consecutive_failures = 0;
        }
        self.save()
    }

    // ── Aliases & combos ───────────────────────────────────────────────

    /// Resolves an alias or raw `provider/model` string into `(provider,
    /// model)`.
    pub fn resolve_alias(&self, name: &str) -> Result<(String, String), StateError> {
        let state = self.inner.read();
        let target = state.aliases.get(name).map(String::as_str).unwrap_or(name);
        split_provider_model(target).ok_or_else(|| StateError::UnknownAlias(name.to_string()))
    }

    /// Expands a combo name into its ordered model list; a name that is not
    /// a combo is treated as a single-model "combo" of one.
    pub fn resolve_models(&self, name: &str) -> Vec<String> {
        let state = self.inner.read();
        state.combos.get(name).cloned().unwrap_or_else(|| vec![name.to_string()])
    }

    pub fn pricing_for(&self, provider: &str, model: &str) -> Option<PricingEntry> {
        self.inner.read().pricing.get(&format!("{provider}/{model}")).copied()
    }

    /// Per-model target-format override (spec §4.7), keyed by
    /// `"provider/model"`; absent for the overwhelming majority of models,
    /// which use the provider's own default target.
    pub fn format_override(&self, provider: &str, model: &str) -> Option<crate::formats::WireFormat> {
        self.inner.read().format_overrides.get(&format!("{provider}/{model}")).copied()
    }

    /// Looks up a user-added generic OpenAI-/Anthropic-compatible node by
    /// id, used when `provider` names a node rather than a well-known
    /// provider (spec §9 "supports user-added ... nodes").
    pub fn get_node(&self, id: &str) -> Option<NodeConfig> {
        self.inner.read().nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn list_nodes(&self) -> Vec<NodeConfig> {
        self.inner.read().nodes.clone()
    }

    pub fn upsert_node(&self, node: NodeConfig) -> Result<(), StateError> {
        {
            let mut state = self.inner.write();
            if let Some(existing) = state.nodes.iter_mut().find(|n| n.id == node.id) {
                *existing = node;
            } else {
                state.nodes.push(node);
            }
        }
        self.save()
    }

    pub fn list_aliases(&self) -> Vec<(String, String)> {
        self.inner.read().aliases.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn set_alias(&self, name: String, target: String) -> Result<(), StateError> {
        {
            self.inner.write().aliases.insert(name, target);
        }
        self.save()
    }

    pub fn list_combos(&self) -> Vec<(String, Vec<String>)> {
        self.inner.read().combos.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn set_combo(&self, name: String, models: Vec<String>) -> Result<(), StateError> {
        {
            self.inner.write().combos.insert(name, models);
        }
        self.save()
    }

    pub fn set_pricing(&self, key: String, entry: PricingEntry) -> Result<(), StateError> {
        {
            self.inner.write().pricing.insert(key, entry);
        }
        self.save()
    }

    pub fn settings(&self) -> Settings {
        self.inner.read().settings.clone()
    }
}

fn split_provider_model(s: &str) -> Option<(String, String)> {
    let (provider, model) = s.split_once('/')?;
    Some((provider.to_string(), model.to_string()))
}

fn load(path: &Path) -> Result<LocalState, StateError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::default()),
        Err(e) => Err(StateError::Read {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn save(path: &Path, state: &LocalState) -> Result<(), StateError> {
    let content = serde_json::to_string_pretty(state)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StateError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &content).map_err(|e| StateError::Write {
        path: tmp_path.display().to_string(),
        source: e,
    })?;

    if path.exists() {
        let bak_path = path.with_extension("json.bak");
        let _ = fs::copy(path, &bak_path);
    }

    fs::rename(&tmp_path, path).map_err(|e| StateError::Write {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AuthType, Secrets, TestStatus};
    use tempfile::tempdir;

    fn sample(id: &str, priority: i64) -> Connection {
        Connection {
            id: id.to_string(),
            provider_id: "openai".to_string(),
            auth_type: AuthType::Apikey,
            display_name: id.to_string(),
            priority,
            global_priority: None,
            default_model: None,
            secrets: Secrets::default(),
            test_status: TestStatus::Unknown,
            last_error: None,
            last_error_at: None,
            cooldown_until: 0,
            consecutive_failures: 0,
            is_active: true,
            created_at: 0,
        }
    }

    #[test]
    fn load_missing_file_returns_default_state() {
        let dir = tempdir().unwrap();
        let state = AppState::open(dir.path().join("local.json")).unwrap();
        assert!(state.list_connections(None).is_empty());
    }

    #[test]
    fn upsert_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.json");
        let state = AppState::open(path.clone()).unwrap();
        state.upsert_connection(sample("c1", 0)).unwrap();

        let reloaded = AppState::open(path).unwrap();
        assert_eq!(reloaded.get_connection("c1").unwrap().provider_id, "openai");
    }

    #[test]
    fn list_connections_sorted_by_priority() {
        let dir = tempdir().unwrap();
        let state = AppState::open(dir.path().join("local.json")).unwrap();
        state.upsert_connection(sample("low", 5)).unwrap();
        state.upsert_connection(sample("high", 1)).unwrap();
        let all = state.list_connections(Some("openai"));
        assert_eq!(all[0].id, "high");
    }

    #[test]
    fn mark_unavailable_then_clear_error_round_trips() {
        let dir = tempdir().unwrap();
        let state = AppState::open(dir.path().join("local.json")).unwrap();
        state.upsert_connection(sample("c1", 0)).unwrap();
        state.mark_unavailable("c1", 5000, "boom", 0).unwrap();
        assert_eq!(state.get_connection("c1").unwrap().cooldown_until, 5000);
        state.clear_error("c1").unwrap();
        let fetched = state.get_connection("c1").unwrap();
        assert_eq!(fetched.cooldown_until, 0);
        assert_eq!(fetched.test_status, TestStatus::Active);
    }

    #[test]
    fn resolve_alias_falls_back_to_raw_provider_model() {
        let dir = tempdir().unwrap();
        let state = AppState::open(dir.path().join("local.json")).unwrap();
        let (provider, model) = state.resolve_alias("openai/gpt-4o").unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(model, "gpt-4o");
    }

    #[test]
    fn resolve_models_expands_combo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.json");
        fs::write(
            &path,
            serde_json::json!({"combos": {"all-fast": ["cheap/a", "cheap/b", "free/c"]}}).to_string(),
        )
        .unwrap();
        let state = AppState::open(path).unwrap();
        assert_eq!(state.resolve_models("all-fast"), vec!["cheap/a", "cheap/b", "free/c"]);
        assert_eq!(state.resolve_models("openai/gpt-4o"), vec!["openai/gpt-4o"]);
    }
}
