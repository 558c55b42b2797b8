//! Per-provider OAuth refresh (spec §4.3 "Refresh methods"). Each provider
//! family encodes the refresh request differently; all agree on returning
//! `None` for any non-2xx response rather than treating it as an error —
//! the caller (Credential Selector / Chat Core) decides what a failed
//! refresh means for fallback.

use serde::Deserialize;
use serde_json::Value;

use super::error::CredentialError;
use super::types::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenaiCodex,
    Qwen,
    Google,
    Iflow,
    Kiro,
    KiroSocial,
}

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub id_token: Option<String>,
    pub extra: Option<Value>,
}

#[derive(Deserialize)]
struct GenericTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    id_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct KiroTokenResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(alias = "expiresIn", default = "default_expires_in")]
    expires_in: i64,
    #[serde(alias = "profileArn")]
    profile_arn: Option<String>,
}

fn endpoint(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "https://console.anthropic.com/v1/oauth/token",
        ProviderKind::OpenaiCodex => "https://auth.openai.com/oauth/token",
        ProviderKind::Qwen => "https://chat.qwen.ai/api/v1/oauth2/token",
        ProviderKind::Google => "https://oauth2.googleapis.com/token",
        ProviderKind::Iflow => "https://iflow.cn/oauth/token",
        ProviderKind::Kiro => "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken",
        ProviderKind::KiroSocial => "https://oidc.us-east-1.amazonaws.com/token",
    }
}

/// Issue the refresh call for `connection` per its provider kind. Returns
/// `Ok(None)` on any non-2xx upstream response (spec §4.3).
pub async fn refresh(
    kind: ProviderKind,
    connection: &Connection,
    http: &reqwest::Client,
) -> Result<Option<RefreshedTokens>, CredentialError> {
    let refresh_token = connection.secrets.refresh_token.clone().unwrap_or_default();
    let url = endpoint(kind);

    let response = match kind {
        ProviderKind::Anthropic => {
            http.post(url)
                .json(&serde_json::json!({
                    "grant_type": "refresh_token",
                    "refresh_token": refresh_token,
                }))
                .send()
                .await?
        }
        ProviderKind::OpenaiCodex | ProviderKind::Qwen | ProviderKind::Google => {
            http.post(url)
                .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])
                .send()
                .await?
        }
        ProviderKind::Iflow => {
            let (username, password) = basic_auth_pair(connection);
            http.post(url)
                .basic_auth(username, Some(password))
                .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])
                .send()
                .await?
        }
        ProviderKind::Kiro => {
            http.post(url)
                .json(&serde_json::json!({"refreshToken": refresh_token}))
                .send()
                .await?
        }
        ProviderKind::KiroSocial => {
            http.post(url)
                .json(&serde_json::json!({
                    "grantType": "refresh_token",
                    "refreshToken": refresh_token,
                }))
                .send()
                .await?
        }
    };

    if !response.status().is_success() {
        return Ok(None);
    }

    match kind {
        ProviderKind::Kiro | ProviderKind::KiroSocial => {
            let body: KiroTokenResponse = response.json().await?;
            Ok(Some(RefreshedTokens {
                access_token: body.access_token,
                refresh_token: body.refresh_token.or(Some(refresh_token)),
                expires_in: body.expires_in,
                id_token: None,
                extra: body.profile_arn.map(|arn| serde_json::json!({"profileArn": arn})),
            }))
        }
        _ => {
            let body: GenericTokenResponse = response.json().await?;
            Ok(Some(RefreshedTokens {
                access_token: body.access_token,
                refresh_token: body.refresh_token.or(Some(refresh_token)),
                expires_in: body.expires_in,
                id_token: body.id_token,
                extra: None,
            }))
        }
    }
}

fn basic_auth_pair(connection: &Connection) -> (String, String) {
    let client_id = connection
        .secrets
        .provider_data
        .as_ref()
        .and_then(|v| v.get("clientId"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let client_secret = connection
        .secrets
        .provider_data
        .as_ref()
        .and_then(|v| v.get("clientSecret"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (client_id, client_secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_distinct_per_kind() {
        let kinds = [
            ProviderKind::Anthropic,
            ProviderKind::OpenaiCodex,
            ProviderKind::Qwen,
            ProviderKind::Google,
            ProviderKind::Iflow,
            ProviderKind::Kiro,
            ProviderKind::KiroSocial,
        ];
        let urls: std::collections::HashSet<&str> = kinds.iter().map(|k| endpoint(*k)).collect();
        assert_eq!(urls.len(), kinds.len());
    }
}
