//! Authentication module
//!
//! Basic-Auth credentials for the SAP OData host, and an OAuth2 client
//! credentials token cache for SAP Build Process Automation (BPA).

use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::BpaSettings;

/// Tokens are treated as expired this long before the issuer says they are
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("Token request failed with status {status}")]
    TokenRequestFailed { status: u16, body: String },

    #[error("Token request could not be sent: {0}")]
    HttpError(#[source] reqwest::Error),

    #[error("Token parse error: {0}")]
    ParseError(String),
}

impl AuthError {
    /// True for errors caused by local settings rather than the token endpoint
    pub fn is_configuration(&self) -> bool {
        matches!(self, AuthError::MissingCredentials(_))
    }
}

/// HTTP Basic credentials for the SAP host
#[derive(Debug)]
pub struct BasicCredentials {
    username: String,
    password: SecretString,
}

impl BasicCredentials {
    pub fn new(username: String, password: SecretString) -> Self {
        Self { username, password }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Value for the `Authorization` header
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password.expose_secret());
        format!("Basic {}", general_purpose::STANDARD.encode(raw.as_bytes()))
    }
}

/// Token response from the OAuth2 issuer
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Cached token with expiry tracking
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    /// Already reduced by [`EXPIRY_BUFFER`]
    expires_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, expires_in: u64, fetched_at: Instant) -> Self {
        let lifetime = Duration::from_secs(expires_in).saturating_sub(EXPIRY_BUFFER);
        Self {
            access_token,
            expires_at: fetched_at + lifetime,
        }
    }

    fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// OAuth2 client-credentials token cache for one issuer.
///
/// The lock is held across the expiry check, the refresh request and the
/// store, so concurrent callers never trigger duplicate token requests.
#[derive(Debug)]
pub struct TokenCache {
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    http_client: Client,
    timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// Create a cache for the given issuer
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: SecretString,
        http_client: Client,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        if token_url.trim().is_empty() {
            return Err(AuthError::MissingCredentials("BPA_TOKEN_URL"));
        }
        if client_id.trim().is_empty() {
            return Err(AuthError::MissingCredentials("BPA_CLIENT_ID"));
        }
        if client_secret.expose_secret().is_empty() {
            return Err(AuthError::MissingCredentials("BPA_CLIENT_SECRET"));
        }

        Ok(Self {
            token_url,
            client_id,
            client_secret,
            http_client,
            timeout,
            token: Mutex::new(None),
        })
    }

    /// Create a cache from validated BPA settings
    pub fn from_settings(
        settings: &BpaSettings,
        http_client: Client,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        Self::new(
            settings.token_url.clone(),
            settings.client_id.clone(),
            SecretString::from(settings.client_secret.expose_secret().to_string()),
            http_client,
            timeout,
        )
    }

    /// Return a token with at least [`EXPIRY_BUFFER`] of validity left,
    /// refreshing it first if needed.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        self.get_token_at(Instant::now()).await
    }

    pub(crate) async fn get_token_at(&self, now: Instant) -> Result<String, AuthError> {
        let mut slot = self.token.lock().await;

        if let Some(ref cached) = *slot {
            if cached.is_valid_at(now) {
                tracing::debug!("Using cached BPA token");
                return Ok(cached.access_token.clone());
            }
        }

        tracing::info!("Acquiring new BPA access token from {}", self.token_url);
        let fresh = self.acquire_token(now).await?;
        let token = fresh.access_token.clone();
        *slot = Some(fresh);

        Ok(token)
    }

    /// Drop the cached token; the next call fetches a new one
    pub async fn clear_cache(&self) {
        let mut slot = self.token.lock().await;
        *slot = None;
    }

    async fn acquire_token(&self, now: Instant) -> Result<CachedToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AuthError::HttpError(e.without_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Token request failed: {}", status);
            return Err(AuthError::TokenRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::HttpError(e.without_url()))?;
        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::ParseError(format!("Failed to parse token response: {}", e))
        })?;

        tracing::info!(
            "Token acquired successfully, expires in {} seconds",
            token_response.expires_in
        );

        Ok(CachedToken::new(
            token_response.access_token,
            token_response.expires_in,
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn cache_for(server: &MockServer) -> TokenCache {
        TokenCache::new(
            server.url("/oauth/token"),
            "bpa-client".to_string(),
            SecretString::from("bpa-secret".to_string()),
            Client::new(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_basic_header_value() {
        let creds = BasicCredentials::new(
            "CONVIA".to_string(),
            SecretString::from("pa:ss".to_string()),
        );
        // base64("CONVIA:pa:ss")
        assert_eq!(creds.header_value(), "Basic Q09OVklBOnBhOnNz");
        assert!(!format!("{:?}", creds).contains("pa:ss"));
    }

    #[test]
    fn test_cached_token_validity() {
        let t = Instant::now();
        let token = CachedToken::new("tok".to_string(), 3600, t);
        assert!(token.is_valid_at(t));
        assert!(token.is_valid_at(t + Duration::from_secs(3539)));
        assert!(!token.is_valid_at(t + Duration::from_secs(3540)));

        // lifetimes shorter than the buffer are never reused
        let short = CachedToken::new("tok".to_string(), 30, t);
        assert!(!short.is_valid_at(t));
    }

    #[test]
    fn test_missing_settings() {
        let err = TokenCache::new(
            String::new(),
            "id".to_string(),
            SecretString::from("s".to_string()),
            Client::new(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.is_configuration());

        let err = TokenCache::new(
            "https://auth.example.com/token".to_string(),
            "id".to_string(),
            SecretString::from(String::new()),
            Client::new(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AuthError::MissingCredentials("BPA_CLIENT_SECRET")
        ));
    }

    #[tokio::test]
    async fn test_token_reused_until_buffered_expiry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .body_includes("grant_type=client_credentials")
                    .body_includes("client_id=bpa-client")
                    .body_includes("client_secret=bpa-secret");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"access_token":"tok-1","expires_in":3600,"token_type":"bearer"}"#);
            })
            .await;

        let cache = cache_for(&server);
        let t = Instant::now();

        assert_eq!(cache.get_token_at(t).await.unwrap(), "tok-1");
        assert_eq!(
            cache
                .get_token_at(t + Duration::from_secs(1800))
                .await
                .unwrap(),
            "tok-1"
        );
        assert_eq!(
            cache
                .get_token_at(t + Duration::from_secs(3539))
                .await
                .unwrap(),
            "tok-1"
        );
        mock.assert_calls_async(1).await;

        // at T+3540 the buffered expiry is reached and a refresh happens
        cache
            .get_token_at(t + Duration::from_secs(3540))
            .await
            .unwrap();
        mock.assert_calls_async(2).await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"access_token":"shared","expires_in":600}"#);
            })
            .await;

        let cache = std::sync::Arc::new(cache_for(&server));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }

        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"access_token":"tok","expires_in":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        cache.get_token().await.unwrap();
        cache.clear_cache().await;
        cache.get_token().await.unwrap();

        mock.assert_calls_async(2).await;
    }

    #[tokio::test]
    async fn test_token_endpoint_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(401).body(r#"{"error":"invalid_client"}"#);
            })
            .await;

        let err = cache_for(&server).get_token().await.unwrap_err();
        match err {
            AuthError::TokenRequestFailed { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_token_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(200).body("<html>login</html>");
            })
            .await;

        let err = cache_for(&server).get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::ParseError(_)));
        assert!(!err.to_string().contains("bpa-secret"));
    }
}
