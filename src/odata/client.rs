//! OData request executor
//!
//! Issues one HTTP call per request with Basic-Auth or Bearer credentials
//! and folds every outcome into a uniform [`SapResponse`]. No retries are
//! performed here; failures surface immediately.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::url::ServiceUrl;
use crate::auth::{AuthError, BasicCredentials, TokenCache};
use crate::config::ConfigError;

/// Status reported for failures that produced no HTTP response
pub const LOCAL_FAILURE_STATUS: u16 = 500;

/// Status reported when the token endpoint answered with an unusable body
const BAD_GATEWAY: u16 = 502;

/// OData client errors
#[derive(Error, Debug)]
pub enum ODataError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("HTTP Error {status}: {reason}")]
    ServerError {
        status: u16,
        reason: String,
        body: String,
    },
}

impl ODataError {
    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        // never echo the URL back; it may carry userinfo
        let e = e.without_url();
        if e.is_timeout() {
            ODataError::Timeout(timeout)
        } else if e.is_connect() {
            ODataError::Connect(e.to_string())
        } else if e.is_decode() || e.is_body() {
            ODataError::ParseError(e.to_string())
        } else {
            ODataError::HttpError(e.to_string())
        }
    }

    /// Failure class of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            ODataError::Config(_) => FailureKind::Configuration,
            ODataError::AuthError(e) if e.is_configuration() => FailureKind::Configuration,
            ODataError::AuthError(AuthError::TokenRequestFailed { .. })
            | ODataError::AuthError(AuthError::ParseError(_))
            | ODataError::ServerError { .. } => FailureKind::UpstreamHttp,
            ODataError::InvalidRequest(_) => FailureKind::Validation,
            _ => FailureKind::Transport,
        }
    }

    /// Status to report: the remote status when there was one
    pub fn status_code(&self) -> u16 {
        match self {
            ODataError::ServerError { status, .. } => *status,
            ODataError::AuthError(AuthError::TokenRequestFailed { status, .. }) => *status,
            ODataError::AuthError(AuthError::ParseError(_)) => BAD_GATEWAY,
            _ => LOCAL_FAILURE_STATUS,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ODataError::ServerError { body, .. }
            | ODataError::AuthError(AuthError::TokenRequestFailed { body, .. })
                if !body.is_empty() =>
            {
                Some(body.clone())
            }
            _ => None,
        }
    }
}

/// Discriminates failed responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    UpstreamHttp,
    Transport,
    Validation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::UpstreamHttp => "upstream_http",
            FailureKind::Transport => "transport",
            FailureKind::Validation => "validation",
        }
    }
}

/// Uniform result of one request
#[derive(Debug, Clone, Serialize)]
pub struct SapResponse {
    pub success: bool,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub url: String,
}

impl SapResponse {
    fn ok(status: StatusCode, data: Value, url: String) -> Self {
        Self {
            success: true,
            status_code: status.as_u16(),
            data: Some(data),
            error: None,
            error_kind: None,
            details: None,
            url,
        }
    }

    pub fn failure(error: &ODataError, url: String) -> Self {
        Self {
            success: false,
            status_code: error.status_code(),
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            details: error.details(),
            url,
        }
    }

    /// Error kind, if the request failed
    pub fn kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    /// Take the payload of a successful response
    pub fn into_data(self) -> Result<Value, SapResponse> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self)
        }
    }
}

/// Which credentials a request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Configured Basic-Auth credentials, if any
    #[default]
    Basic,
    /// Bearer token from the client's token cache
    Bearer,
    /// No `Authorization` header
    Anonymous,
}

/// One outbound request
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub method: Method,
    pub url: ServiceUrl,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
    pub auth: AuthMode,
}

impl QueryRequest {
    pub fn new(method: Method, url: ServiceUrl) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            auth: AuthMode::default(),
        }
    }

    pub fn get(url: ServiceUrl) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }
}

/// HTTP executor for SAP OData services
#[derive(Debug)]
pub struct SapClient {
    http_client: Client,
    credentials: Option<BasicCredentials>,
    token_cache: Option<Arc<TokenCache>>,
    default_timeout: Duration,
}

impl SapClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `credentials` - Basic-Auth credentials attached to `AuthMode::Basic` requests
    /// * `default_timeout` - Timeout for requests that do not set their own
    /// * `insecure_ssl` - Skip TLS certificate verification (sandbox systems)
    pub fn new(
        credentials: Option<BasicCredentials>,
        default_timeout: Duration,
        insecure_ssl: bool,
    ) -> Result<Self, ODataError> {
        let mut builder = Client::builder();
        if insecure_ssl {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http_client = builder
            .build()
            .map_err(|e| ODataError::HttpError(e.to_string()))?;

        Ok(Self {
            http_client,
            credentials,
            token_cache: None,
            default_timeout,
        })
    }

    /// Attach the token cache used for `AuthMode::Bearer` requests
    #[must_use]
    pub fn with_token_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.token_cache = Some(cache);
        self
    }

    /// Underlying HTTP client, shareable with the token cache
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn has_token_cache(&self) -> bool {
        self.token_cache.is_some()
    }

    /// Execute and decode the body as JSON. An empty body decodes to `null`.
    pub async fn execute(&self, request: &QueryRequest) -> SapResponse {
        let url = request.url.to_string();
        let result = match self.send(request, &url).await {
            Ok((status, body)) if body.trim().is_empty() => Ok((status, Value::Null)),
            Ok((status, body)) => serde_json::from_str(&body)
                .map(|data| (status, data))
                .map_err(|e| ODataError::ParseError(format!("Malformed JSON response: {}", e))),
            Err(e) => Err(e),
        };
        self.finish(result, url)
    }

    /// Execute and return the body verbatim as a JSON string value
    pub async fn execute_text(&self, request: &QueryRequest) -> SapResponse {
        let url = request.url.to_string();
        let result = self
            .send(request, &url)
            .await
            .map(|(status, body)| (status, Value::String(body)));
        self.finish(result, url)
    }

    fn finish(&self, result: Result<(StatusCode, Value), ODataError>, url: String) -> SapResponse {
        let url = redact_url(&url);
        match result {
            Ok((status, data)) => SapResponse::ok(status, data, url),
            Err(e) => {
                tracing::warn!("Request to {} failed: {}", url, e);
                SapResponse::failure(&e, url)
            }
        }
    }

    async fn send(
        &self,
        request: &QueryRequest,
        url: &str,
    ) -> Result<(StatusCode, String), ODataError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let headers = self.build_headers(request).await?;

        tracing::debug!("{} {}", request.method, redact_url(url));

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .headers(headers)
            .timeout(timeout);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ODataError::from_reqwest(e, timeout))?;
        let status = response.status();

        if !status.is_success() {
            // a missing or unreadable body must not mask the HTTP error
            let body = response.text().await.unwrap_or_default();
            return Err(ODataError::ServerError {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ODataError::from_reqwest(e, timeout))?;
        Ok((status, body))
    }

    /// Defaults, then caller overrides, then credentials
    async fn build_headers(&self, request: &QueryRequest) -> Result<HeaderMap, ODataError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ODataError::InvalidRequest(format!("invalid header name '{}'", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ODataError::InvalidRequest(format!("invalid value for header '{}'", name))
            })?;
            headers.insert(name, value);
        }

        let authorization = match request.auth {
            AuthMode::Basic => self.credentials.as_ref().map(BasicCredentials::header_value),
            AuthMode::Bearer => {
                let cache = self
                    .token_cache
                    .as_ref()
                    .ok_or(AuthError::MissingCredentials("BPA_TOKEN_URL"))?;
                Some(format!("Bearer {}", cache.get_token().await?))
            }
            AuthMode::Anonymous => None,
        };
        if let Some(value) = authorization {
            let mut value = HeaderValue::from_str(&value).map_err(|_| {
                ODataError::InvalidRequest("credentials contain invalid header characters".into())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

/// Replace any `user:pass@` userinfo in a URL
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => url.to_string(),
    }
}
