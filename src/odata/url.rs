//! SAP service URL construction
//!
//! `SapEndpoint` holds the configured host/port/client and produces
//! `ServiceUrl` values: `<host>[:<port>]/<path>?sap-client=<client>`.

use reqwest::Url;
use std::fmt;

use crate::config::ConfigError;

/// Configured SAP host, normalized once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SapEndpoint {
    /// scheme://authority, port included when it must be
    origin: String,
    /// Path component of the configured host, without trailing slash
    base_path: String,
    client: String,
}

impl SapEndpoint {
    /// Normalize a configured host.
    ///
    /// The port is appended only if the host does not already carry one and
    /// it differs from the scheme default (80 for http, 443 for https).
    pub fn new(host: &str, port: u16, client: &str) -> Result<Self, ConfigError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigError::Missing("SAP_HOST"));
        }
        let client = client.trim();
        if client.is_empty() {
            return Err(ConfigError::Missing("SAP_CLIENT"));
        }

        let parsed = Url::parse(host).map_err(|e| ConfigError::Invalid {
            key: "SAP_HOST",
            message: format!("must be a URL including the scheme (e.g. https://<host>): {}", e),
        })?;
        let default_port = match parsed.scheme() {
            "https" => 443,
            "http" => 80,
            other => {
                return Err(ConfigError::Invalid {
                    key: "SAP_HOST",
                    message: format!("unsupported scheme '{}'", other),
                })
            }
        };

        let (scheme, rest) = host.split_once("://").ok_or_else(|| ConfigError::Invalid {
            key: "SAP_HOST",
            message: "must include a URL scheme".to_string(),
        })?;
        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let base_path = rest[authority_end..]
            .split(['?', '#'])
            .next()
            .unwrap_or("")
            .trim_end_matches('/');

        let origin = if !authority_has_port(authority) && port != default_port {
            format!("{}://{}:{}", scheme, authority, port)
        } else {
            format!("{}://{}", scheme, authority)
        };

        Ok(Self {
            origin,
            base_path: base_path.to_string(),
            client: client.to_string(),
        })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    /// Host part (scheme, authority and base path) without a trailing slash
    pub fn root(&self) -> String {
        format!("{}{}", self.origin, self.base_path)
    }

    /// Build the URL for a service path, with `sap-client` set
    pub fn service_url(&self, service_path: &str) -> Result<ServiceUrl, ConfigError> {
        let path = service_path.trim().trim_start_matches('/');
        if path.is_empty() {
            return Err(ConfigError::Invalid {
                key: "service_path",
                message: "must not be empty".to_string(),
            });
        }

        Ok(ServiceUrl::new(format!("{}/{}", self.root(), path))
            .with_param("sap-client", self.client.clone()))
    }
}

/// True if the authority (`[user@]host[:port]`) carries an explicit port
fn authority_has_port(authority: &str) -> bool {
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    match host_port.rfind(']') {
        // IPv6 literal
        Some(close) => host_port[close..].contains(':'),
        None => host_port.contains(':'),
    }
}

/// An immutable request URL: path plus query parameters.
///
/// Parameters have mapping semantics (setting an existing key replaces it)
/// and are percent-encoded when the URL is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    path: String,
    query: Vec<(String, String)>,
}

impl ServiceUrl {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Parse a caller-supplied absolute URL; `None` unless it is http(s)
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let parsed = Url::parse(raw).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, query),
            None => (raw, ""),
        };
        let mut url = Self::new(path.split('#').next().unwrap_or(path));
        for pair in query.split('#').next().unwrap_or("").split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            url = url.with_param(decode(key), decode(value));
        }
        Some(url)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a query parameter, replacing any existing value for the key
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.query.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.query.push((key, value)),
        }
        self
    }

    #[must_use]
    pub fn with_params<I, K, V>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        params
            .into_iter()
            .fold(self, |url, (k, v)| url.with_param(k, v))
    }

    /// Append a percent-encoded path segment
    #[must_use]
    pub fn with_segment(mut self, segment: &str) -> Self {
        self.path = format!(
            "{}/{}",
            self.path.trim_end_matches('/'),
            urlencoding::encode(segment)
        );
        self
    }

    /// Append text to the path verbatim; callers encode it first
    /// (see [`encode_predicate`])
    #[must_use]
    pub fn with_path_suffix(mut self, suffix: &str) -> Self {
        self.path = format!("{}{}", self.path.trim_end_matches('/'), suffix);
        self
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{}{}={}",
                sep,
                urlencoding::encode(key),
                urlencoding::encode(value)
            )?;
        }
        Ok(())
    }
}

/// Percent-encode text for an OData key predicate in the path.
///
/// Predicate syntax characters (`'`, `(`, `)`, `,`, `=`) stay literal;
/// `#`, `?`, `%`, `/`, spaces and non-ASCII are encoded.
pub fn encode_predicate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || "-._~'()*!,;=:@$&+".contains(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}
