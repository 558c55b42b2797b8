//! Usage Recorder (spec §3 "Usage entry", §4.8 steps 9-10, §4.9): derives
//! cost from the pricing table, persists an append-only history to
//! `usage.json`, and tracks per-model in-flight request counts. Cost
//! lookups are best-effort — a missing pricing entry yields cost `0`
//! rather than failing the request (spec §9 open question: "treat pricing
//! lookup as best-effort"). Timestamp/row conventions grounded on the
//! teacher's `database/models/ai_provider.rs` (`chrono::Utc::now().to_rfc3339()`),
//! adapted from a SQLite row to the JSON history file spec §6 names.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::formats::openai::TokenUsage;
use crate::state::PricingEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: String,
    pub provider: String,
    pub model: String,
    pub connection_id: String,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsageHistory {
    #[serde(default)]
    history: Vec<UsageEntry>,
}

/// Linear cost given a pricing entry; `0` when pricing is absent for this
/// (provider, model) (spec §8 testable property: `cost(p, m, 0) = 0`).
pub fn cost(pricing: Option<&PricingEntry>, tokens: &TokenUsage) -> f64 {
    let Some(pricing) = pricing else {
        return 0.0;
    };
    let per_million = |rate: f64, count: u64| rate * (count as f64) / 1_000_000.0;

    let mut total = per_million(pricing.input, tokens.prompt) + per_million(pricing.output, tokens.completion);
    if let Some(cached) = pricing.cached {
        total += per_million(cached, tokens.cached);
    }
    if let Some(reasoning) = pricing.reasoning {
        total += per_million(reasoning, tokens.reasoning);
    }
    if let Some(cache_creation) = pricing.cache_creation {
        total += per_million(cache_creation, tokens.cache_creation);
    }
    total
}

pub struct UsageRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
    in_flight: DashMap<String, AtomicI64>,
}

impl UsageRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            in_flight: DashMap::new(),
        }
    }

    /// Builds and appends one usage entry. I/O errors are returned to the
    /// caller to log, never to fail the already-completed request.
    pub fn record(
        &self,
        provider: &str,
        model: &str,
        connection_id: &str,
        tokens: &TokenUsage,
        pricing: Option<&PricingEntry>,
    ) -> std::io::Result<UsageEntry> {
        let entry = UsageEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            provider: provider.to_string(),
            model: model.to_string(),
            connection_id: connection_id.to_string(),
            tokens: tokens.clone(),
            cost_usd: cost(pricing, tokens),
        };
        self.persist(&entry)?;
        Ok(entry)
    }

    fn persist(&self, entry: &UsageEntry) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        let mut history = load(&self.path)?;
        history.history.push(entry.clone());
        save(&self.path, &history)
    }

    /// Mutated only from the request task that owns it; reads (e.g. a
    /// dashboard) are advisory and need no external locking beyond the
    /// atomic counter itself (spec §5 "Shared resources").
    pub fn increment_in_flight(&self, model: &str) {
        self.in_flight.entry(model.to_string()).or_insert_with(|| AtomicI64::new(0)).fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_in_flight(&self, model: &str) {
        if let Some(counter) = self.in_flight.get(model) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn in_flight_count(&self, model: &str) -> i64 {
        self.in_flight.get(model).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

fn load(path: &Path) -> std::io::Result<UsageHistory> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content).unwrap_or_default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsageHistory::default()),
        Err(e) => Err(e),
    }
}

fn save(path: &Path, history: &UsageHistory) -> std::io::Result<()> {
    let content = serde_json::to_string_pretty(history)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cost_is_zero_without_pricing() {
        let tokens = TokenUsage {
            prompt: 1000,
            completion: 1000,
            ..Default::default()
        };
        assert_eq!(cost(None, &tokens), 0.0);
    }

    #[test]
    fn cost_is_linear_in_each_token_category() {
        let pricing = PricingEntry {
            input: 3.0,
            output: 15.0,
            cached: Some(1.5),
            reasoning: Some(15.0),
            cache_creation: Some(3.75),
        };
        let tokens = TokenUsage {
            prompt: 1_000_000,
            completion: 1_000_000,
            cached: 1_000_000,
            reasoning: 1_000_000,
            cache_creation: 1_000_000,
        };
        assert_eq!(cost(Some(&pricing), &tokens), 3.0 + 15.0 + 1.5 + 15.0 + 3.75);
    }

    #[test]
    fn record_persists_and_reloads_history() {
        let dir = tempdir().unwrap();
        let recorder = UsageRecorder::new(dir.path().join("usage.json"));
        recorder.record("openai", "gpt-4o", "c1", &TokenUsage::default(), None).unwrap();
        recorder.record("openai", "gpt-4o", "c1", &TokenUsage::default(), None).unwrap();
        let content = fs::read_to_string(dir.path().join("usage.json")).unwrap();
        let history: UsageHistory = serde_json::from_str(&content).unwrap();
        assert_eq!(history.history.len(), 2);
    }

    #[test]
    fn in_flight_counter_tracks_increments_and_decrements_per_model() {
        let dir = tempdir().unwrap();
        let recorder = UsageRecorder::new(dir.path().join("usage.json"));
        recorder.increment_in_flight("gpt-4o");
        recorder.increment_in_flight("gpt-4o");
        recorder.decrement_in_flight("gpt-4o");
        assert_eq!(recorder.in_flight_count("gpt-4o"), 1);
        assert_eq!(recorder.in_flight_count("claude-sonnet"), 0);
    }
}
