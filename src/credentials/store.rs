//! Secret material for connections lives in the OS keychain, with a
//! plaintext fallback table for headless hosts with no secret service
//! running — grounded on the teacher's `CredentialStore` (keyring-only),
//! extended since this gateway runs unattended on a server rather than
//! under a desktop session. Connection *metadata* (priority, cooldown,
//! test status — everything spec §6 says belongs in `local.json`) lives in
//! [`crate::state::AppState`] instead; this store only ever sees the
//! connection id and its secret blob.

use keyring::Entry;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use zeroize::Zeroize;

use super::error::CredentialError;
use super::oauth::RefreshedTokens;
use super::types::Secrets;

const KEYRING_SERVICE: &str = "nexus-gateway.connection-secrets";

pub struct CredentialStore {
    pool: Pool<SqliteConnectionManager>,
}

impl CredentialStore {
    pub fn open(db_path: &std::path::Path) -> Result<Self, CredentialError> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
            c.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;",
            )
        });
        let pool = Pool::new(manager)?;
        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), CredentialError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS secrets (
                connection_id TEXT PRIMARY KEY,
                blob TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn read_secrets(&self, connection_id: &str) -> Result<Secrets, CredentialError> {
        if let Ok(entry) = Entry::new(KEYRING_SERVICE, connection_id) {
            if let Ok(blob) = entry.get_password() {
                return Ok(serde_json::from_str(&blob)?);
            }
        }
        let conn = self.pool.get()?;
        let blob: Option<String> = conn
            .query_row("SELECT blob FROM secrets WHERE connection_id = ?1", params![connection_id], |r| r.get(0))
            .unwrap_or(None);
        match blob {
            Some(b) => Ok(serde_json::from_str(&b)?),
            None => Ok(Secrets::default()),
        }
    }

    pub fn write_secrets(&self, connection_id: &str, secrets: &Secrets) -> Result<(), CredentialError> {
        let blob = serde_json::to_string(secrets)?;
        let keyring_ok = Entry::new(KEYRING_SERVICE, connection_id).and_then(|e| e.set_password(&blob)).is_ok();
        if !keyring_ok {
            let conn = self.pool.get()?;
            conn.execute(
                "INSERT INTO secrets (connection_id, blob) VALUES (?1, ?2)
                 ON CONFLICT(connection_id) DO UPDATE SET blob = excluded.blob",
                params![connection_id, blob],
            )?;
        }
        Ok(())
    }

    pub fn delete_secrets(&self, connection_id: &str) -> Result<(), CredentialError> {
        let _ = Entry::new(KEYRING_SERVICE, connection_id).and_then(|e| e.delete_credential());
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM secrets WHERE connection_id = ?1", params![connection_id])?;
        Ok(())
    }

    pub fn apply_refreshed_tokens(&self, connection_id: &str, tokens: &RefreshedTokens, now: i64) -> Result<Secrets, CredentialError> {
        let mut secrets = self.read_secrets(connection_id)?;
        if let Some(stale) = secrets.access_token.as_mut() {
            stale.zeroize();
        }
        secrets.access_token = Some(tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            secrets.refresh_token = Some(refresh.clone());
        }
        if let Some(id_token) = &tokens.id_token {
            secrets.id_token = Some(id_token.clone());
        }
        if let Some(extra) = &tokens.extra {
            secrets.provider_data = Some(extra.clone());
        }
        secrets.expires_at = Some(now + tokens.expires_in);
        self.write_secrets(connection_id, &secrets)?;
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::open(&dir.path().join("secrets.sqlite3")).unwrap();
        let secrets = Secrets {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        store.write_secrets("c1", &secrets).unwrap();
        let fetched = store.read_secrets("c1").unwrap();
        assert_eq!(fetched.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn missing_connection_returns_default_secrets() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::open(&dir.path().join("secrets.sqlite3")).unwrap();
        let fetched = store.read_secrets("ghost").unwrap();
        assert!(fetched.api_key.is_none());
    }

    #[test]
    fn delete_secrets_clears_fallback_row() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::open(&dir.path().join("secrets.sqlite3")).unwrap();
        store.write_secrets("c1", &Secrets::default()).unwrap();
        store.delete_secrets("c1").unwrap();
        let fetched = store.read_secrets("c1").unwrap();
        assert!(fetched.access_token.is_none());
    }

    #[test]
    fn apply_refreshed_tokens_sets_expiry_and_keeps_prior_refresh_token_when_omitted() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::open(&dir.path().join("secrets.sqlite3")).unwrap();
        store
            .write_secrets(
                "c1",
                &Secrets {
                    refresh_token: Some("r1".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let tokens = RefreshedTokens {
            access_token: "a2".to_string(),
            refresh_token: None,
            expires_in: 3600,
            id_token: None,
            extra: None,
        };
        let updated = store.apply_refreshed_tokens("c1", &tokens, 1000).unwrap();
        assert_eq!(updated.access_token.as_deref(), Some("a2"));
        assert_eq!(updated.refresh_token.as_deref(), Some("r1"));
        assert_eq!(updated.expires_at, Some(4600));
    }
}
