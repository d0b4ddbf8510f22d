//! Credential storage and the round-robin pool.
//!
//! Application secrets come from the environment; user token triples come
//! from `temp_tokens.json`, an array of `{id, oauth_token,
//! oauth_token_secret}`. The pool hands out a fresh client per analysis,
//! rotating through user credentials so concurrent analyses spread their
//! rate-limit budgets across accounts.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::error::{UpstreamError, UpstreamResult};

use super::http::HttpBackend;
use super::UpstreamClient;

/// Application-level secrets: the OAuth1 consumer pair and, optionally, an
/// application-only bearer token.
#[derive(Debug, Clone, Default)]
pub struct AppSecrets {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub bearer_token: Option<String>,
    pub user_agent: String,
}

impl AppSecrets {
    /// Read secrets from `SWAY_CONSUMER_KEY`, `SWAY_CONSUMER_SECRET`, and
    /// optionally `SWAY_BEARER_TOKEN`.
    pub fn from_env() -> UpstreamResult<Self> {
        let consumer_key = std::env::var("SWAY_CONSUMER_KEY")
            .map_err(|_| UpstreamError::Credentials("SWAY_CONSUMER_KEY not set".into()))?;
        let consumer_secret = std::env::var("SWAY_CONSUMER_SECRET")
            .map_err(|_| UpstreamError::Credentials("SWAY_CONSUMER_SECRET not set".into()))?;
        Ok(AppSecrets {
            consumer_key,
            consumer_secret,
            bearer_token: std::env::var("SWAY_BEARER_TOKEN").ok(),
            user_agent: "sway-analytics".into(),
        })
    }
}

/// One user's token triple from the credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct UserToken {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub oauth_token: String,
    pub oauth_token_secret: String,
}

/// Token files in the wild carry IDs as both strings and numbers.
fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Round-robin allocator of upstream clients over a list of user tokens.
pub struct CredentialPool {
    app: AppSecrets,
    tokens: Vec<UserToken>,
    next_idx: usize,
}

impl CredentialPool {
    /// Load the token file. An unreadable or malformed file is an error; a
    /// missing one degrades to application-only sessions.
    pub fn load(path: impl AsRef<Path>, app: AppSecrets) -> UpstreamResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no credentials file; using application-only sessions");
            return Ok(CredentialPool {
                app,
                tokens: Vec::new(),
                next_idx: 0,
            });
        }
        let data = fs::read_to_string(path)
            .map_err(|e| UpstreamError::Credentials(format!("{}: {e}", path.display())))?;
        let tokens: Vec<UserToken> = serde_json::from_str(&data)
            .map_err(|e| UpstreamError::Credentials(format!("{}: {e}", path.display())))?;
        Ok(CredentialPool {
            app,
            tokens,
            next_idx: 0,
        })
    }

    /// Pool with no user tokens; every client is application-only.
    pub fn app_only(app: AppSecrets) -> Self {
        CredentialPool {
            app,
            tokens: Vec::new(),
            next_idx: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// A fresh client configured with the next user credential, wrapping
    /// around the list.
    pub fn next_client(&mut self) -> UpstreamClient {
        let user = if self.tokens.is_empty() {
            None
        } else {
            let token = self.tokens[self.next_idx].clone();
            self.next_idx = (self.next_idx + 1) % self.tokens.len();
            Some(token)
        };
        UpstreamClient::new(Arc::new(HttpBackend::connect(self.app.clone(), user)))
    }
}
