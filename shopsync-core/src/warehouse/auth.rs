//! Warehouse credentials: service-account keys and pre-resolved tokens.
//!
//! A service-account key is turned into an access token with the OAuth 2.0
//! JWT bearer grant (RFC 7523): an RS256-signed assertion is posted to the
//! key's `token_uri`. Tokens are cached until five minutes before expiry.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ConfigError, WarehouseError};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account JSON key the pipeline uses.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Credentials {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| ConfigError::Credentials {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Resolved warehouse credential material.
#[derive(Debug, Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    /// Access token obtained elsewhere; used as-is.
    StaticToken(String),
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Build the signed JWT assertion for `key` at time `now`.
pub fn build_assertion(
    key: &ServiceAccountKey,
    scope: &str,
    now: DateTime<Utc>,
) -> Result<String, WarehouseError> {
    let auth_err = |message: String| WarehouseError::Auth { message };

    let header = serde_json::to_vec(&JwtHeader {
        alg: "RS256",
        typ: "JWT",
    })
    .map_err(|e| auth_err(e.to_string()))?;
    let claims = serde_json::to_vec(&JwtClaims {
        iss: key.client_email.clone(),
        scope: scope.to_string(),
        aud: key.token_uri.clone(),
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    })
    .map_err(|e| auth_err(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );

    let pkey = PKey::private_key_from_pem(key.private_key.as_bytes())
        .map_err(|e| auth_err(format!("invalid private key: {e}")))?;
    let mut signer =
        Signer::new(MessageDigest::sha256(), &pkey).map_err(|e| auth_err(e.to_string()))?;
    signer
        .update(signing_input.as_bytes())
        .map_err(|e| auth_err(e.to_string()))?;
    let signature = signer.sign_to_vec().map_err(|e| auth_err(e.to_string()))?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::minutes(5)
    }
}

/// Hands out bearer tokens for warehouse requests.
pub struct TokenProvider {
    credentials: Credentials,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: Credentials, client: reqwest::Client) -> Self {
        Self {
            credentials,
            client,
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, WarehouseError> {
        let key = match &self.credentials {
            Credentials::StaticToken(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(key) => key,
        };

        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.token.clone());
        }

        let fresh = self.exchange(key, now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn exchange(
        &self,
        key: &ServiceAccountKey,
        now: DateTime<Utc>,
    ) -> Result<CachedToken, WarehouseError> {
        let assertion = build_assertion(key, BIGQUERY_SCOPE, now)?;
        debug!(client_email = %key.client_email, "Requesting service-account access token");

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| WarehouseError::Auth {
                message: format!("token request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| WarehouseError::Auth {
            message: format!("failed to read token response: {e}"),
        })?;
        if !status.is_success() {
            return Err(WarehouseError::Auth {
                message: format!("token request failed (HTTP {status}): {body}"),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| WarehouseError::Auth {
            message: format!("unexpected token response: {e}"),
        })?;
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: now + Duration::seconds(parsed.expires_in.unwrap_or(3600)),
        })
    }
}
