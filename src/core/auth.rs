use std::time::{Duration, Instant};

use anyhow::anyhow;
use base64::Engine;
use reqwest::StatusCode;
use tokio::sync::Mutex;

/// Tokens are refreshed this long before they actually expire.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN < self.expires_at
    }
}

/// OAuth2 client-credentials bearer token, cached until shortly before expiry.
pub struct TokenCache {
    client: reqwest::Client,
    token_url: String,
    credentials: ClientCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub async fn bearer(&self) -> anyhow::Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch_new_token().await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    pub async fn refresh(&self) -> anyhow::Result<String> {
        self.invalidate().await;
        self.bearer().await
    }

    /// Installs a token obtained out of band, valid for `ttl`.
    pub async fn prime(&self, access_token: impl Into<String>, ttl: Duration) {
        *self.cached.lock().await = Some(CachedToken {
            access_token: access_token.into(),
            expires_at: Instant::now() + ttl,
        });
    }

    async fn fetch_new_token(&self) -> anyhow::Result<CachedToken> {
        tracing::debug!("[auth] requesting client-credentials token");
        let response = self
            .client
            .post(&self.token_url)
            .header("Authorization", self.credentials.basic_header())
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Token exchange failed: HTTP {}", response.status()));
        }

        let json: serde_json::Value = response.json().await?;
        let access_token = json
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("No access_token in token response"))?
            .to_string();
        let expires_in = json
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(3600);

        Ok(CachedToken {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        })
    }

    /// Bearer-authenticated GET returning JSON.
    ///
    /// A 401 invalidates the cached token and retries once with a fresh one; a
    /// second 401 is returned as an error. Other non-success statuses are not
    /// retried.
    pub async fn authorized_get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<serde_json::Value> {
        let bearer = self.bearer().await?;
        let response = self.send_get(url, query, &bearer).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("[auth] 401 from {}, refreshing token", url);
            let fresh = self.refresh().await?;
            let retry = self.send_get(url, query, &fresh).await?;
            if retry.status() == StatusCode::UNAUTHORIZED {
                return Err(anyhow!("HTTP 401 from {} after token refresh", url));
            }
            retry
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(anyhow!("HTTP {} from {}", response.status(), url));
        }

        Ok(response.json().await?)
    }

    async fn send_get(
        &self,
        url: &str,
        query: &[(&str, String)],
        bearer: &str,
    ) -> anyhow::Result<reqwest::Response> {
        Ok(self
            .client
            .get(url)
            .query(query)
            .bearer_auth(bearer)
            .send()
            .await?)
    }
}
