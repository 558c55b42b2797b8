//! Request Logger (spec §4.7/§4.8 step 3, §6 `log.txt`): a one-line-per-request
//! summary log (`dd-mm-yyyy HH:MM:SS | model | PROVIDER | account |
//! sentTokens | recvTokens | status`), rewritten trimmed to the last 200
//! lines after each append (spec §5: "log files are trimmed to the last
//! 200 lines after each append"), plus the five canonical debug snapshots
//! written to disk only when request logging is enabled. Grounded on the
//! teacher's `#[tracing::instrument]` discipline in `commands/streaming_chat.rs`
//! for structured tracing, and on `config::loader`'s atomic tmp-then-rename
//! write for the trimmed rewrite.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

const MAX_LOG_LINES: usize = 200;

/// Masks a secret for logging: keeps the last 4 characters, replaces the
/// rest with `*`. Short keys are masked in full.
pub fn mask_key(key: &str) -> String {
    let visible = 4;
    let len = key.chars().count();
    if len <= visible {
        return "*".repeat(len);
    }
    let tail: String = key.chars().skip(len - visible).collect();
    format!("{}{}", "*".repeat(len - visible), tail)
}

pub struct RequestLogger {
    log_path: PathBuf,
    debug_dir: PathBuf,
    enabled: bool,
    write_lock: Mutex<()>,
}

impl RequestLogger {
    pub fn new(app_dir: PathBuf, enabled: bool) -> Self {
        Self {
            log_path: app_dir.join("log.txt"),
            debug_dir: app_dir.join("request-logs"),
            enabled,
            write_lock: Mutex::new(()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Appends one `log.txt` line. Called for the PENDING line when a
    /// request starts, and again with FAILED/OK once it resolves (spec §8
    /// scenario 3: "two PENDING→FAILED followed by one 200 OK").
    pub fn append_line(&self, model: &str, provider: &str, account: &str, sent_tokens: u64, recv_tokens: u64, status: &str) {
        let line = format!(
            "{} | {model} | {provider} | {account} | {sent_tokens} | {recv_tokens} | {status}",
            Utc::now().format("%d-%m-%Y %H:%M:%S")
        );
        let _guard = self.write_lock.lock();
        if let Err(err) = self.append_and_trim(&line) {
            tracing::warn!(error = %err, "failed to write request log line");
        }
    }

    fn append_and_trim(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lines: Vec<String> = match fs::read_to_string(&self.log_path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        lines.push(line.to_string());
        if lines.len() > MAX_LOG_LINES {
            let excess = lines.len() - MAX_LOG_LINES;
            lines.drain(0..excess);
        }

        let tmp = self.log_path.with_extension("txt.tmp");
        {
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp)?;
            for l in &lines {
                writeln!(file, "{l}")?;
            }
        }
        fs::rename(&tmp, &self.log_path)
    }

    /// Writes the five canonical debug snapshots for one request (spec
    /// §4.8 step 3), a no-op unless request logging is enabled.
    pub fn record_snapshots(&self, request_id: &str, snapshots: &RequestSnapshots) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.write_snapshots(request_id, snapshots) {
            tracing::warn!(error = %err, "failed to write request debug snapshot");
        }
    }

    fn write_snapshots(&self, request_id: &str, snapshots: &RequestSnapshots) -> std::io::Result<()> {
        fs::create_dir_all(&self.debug_dir)?;
        let path = self.debug_dir.join(format!("{request_id}.json"));
        let content = serde_json::to_string_pretty(snapshots)?;
        fs::write(path, content)
    }
}

/// The five canonical snapshots spec §4.8 step 3 names: raw client body,
/// detected formats, translated upstream body, upstream URL/headers, and
/// the final response or error.
#[derive(Debug, Default, Serialize)]
pub struct RequestSnapshots {
    pub raw_client_body: Value,
    pub source_format: String,
    pub target_format: String,
    pub translated_upstream_body: Value,
    pub upstream_url: String,
    pub upstream_headers: Vec<(String, String)>,
    pub final_response_or_error: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mask_key_keeps_last_four_characters() {
        assert_eq!(mask_key("sk-abcdef1234"), "*********1234");
    }

    #[test]
    fn mask_key_masks_short_keys_entirely() {
        assert_eq!(mask_key("ab"), "**");
    }

    #[test]
    fn append_line_trims_to_last_200_lines() {
        let dir = tempdir().unwrap();
        let logger = RequestLogger::new(dir.path().to_path_buf(), false);
        for i in 0..205 {
            logger.append_line("gpt-4o", "OPENAI", "c1", i, i, "200 OK");
        }
        let content = fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(content.lines().count(), MAX_LOG_LINES);
        assert!(content.lines().next().unwrap().contains("| 5 | 5 |"));
    }

    #[test]
    fn snapshots_are_not_written_when_logging_disabled() {
        let dir = tempdir().unwrap();
        let logger = RequestLogger::new(dir.path().to_path_buf(), false);
        logger.record_snapshots("req-1", &RequestSnapshots::default());
        assert!(!dir.path().join("request-logs").exists());
    }

    #[test]
    fn snapshots_are_written_when_logging_enabled() {
        let dir = tempdir().unwrap();
        let logger = RequestLogger::new(dir.path().to_path_buf(), true);
        logger.record_snapshots("req-1", &RequestSnapshots::default());
        assert!(dir.path().join("request-logs").join("req-1.json").exists());
    }
}
