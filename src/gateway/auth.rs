//! Local bearer-token auth for the config surface (connections, nodes,
//! aliases, combos, pricing, settings). The chat-completion routes carry no
//! gateway-level auth of their own — spec §6 describes them as accepting
//! whatever wire-format body a configured provider expects — but the admin
//! CRUD routes are local-only and gated the same way the teacher's
//! `gateway/auth.rs` gates its dashboard API: a random token written to a
//! `0600` file on first run, checked as `Authorization: Bearer <token>`.

use std::fs;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub fn token_path() -> Result<PathBuf, String> {
    crate::config::app_dir().map(|d| d.join("admin.token"))
}

/// Loads the existing admin token from disk, or generates and persists one.
pub fn load_or_create_token() -> Result<String, String> {
    let path = token_path()?;

    if path.exists() {
        return fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| format!("failed to read admin token: {e}"));
    }

    let token = Uuid::new_v4().to_string().replace('-', "");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create app dir: {e}"))?;
    }
    fs::write(&path, &token).map_err(|e| format!("failed to write admin token: {e}"))?;

    #[cfg(unix)]
    {
        let mut perms = fs::metadata(&path).map_err(|e| format!("failed to stat admin token: {e}"))?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&path, perms).map_err(|e| format!("failed to chmod admin token: {e}"))?;
    }

    tracing::info!(path = %path.display(), "admin token written");
    Ok(token)
}

/// Validates `Authorization: Bearer <token>` on the config CRUD routes.
/// Compares in constant time so the admin token can't be brute-forced via
/// response-timing differences.
pub async fn auth_middleware(headers: HeaderMap, request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let expected = load_or_create_token().map_err(|err| {
        tracing::error!(error = %err, "admin auth middleware");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    match provided {
        Some(token) if token.as_bytes().ct_eq(expected.as_bytes()).into() => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
