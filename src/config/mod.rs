//! Configuration module
//!
//! Settings are read from an optional TOML file and then overlaid with
//! environment variables (environment wins). `Config` is the raw, partially
//! filled view; `RuntimeConfig` is the validated form the server runs with.

use crate::auth::BasicCredentials;
use crate::odata::SapEndpoint;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "sap-odata-mcp.toml";

const DEFAULT_PORT: u16 = 443;
const DEFAULT_CLIENT: &str = "100";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GENERIC_TIMEOUT_SECS: u64 = 10;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Raw configuration as read from file and environment
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sap: SapSection,
    pub bpa: BpaSection,
    pub services: ServicePaths,
    pub timeouts: TimeoutSection,
}

/// `[sap]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SapSection {
    pub host: Option<String>,
    pub port: Option<String>,
    pub client: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub insecure_ssl: Option<bool>,
}

/// `[bpa]` table (SAP Build Process Automation, OAuth2 client credentials)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BpaSection {
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub base_url: Option<String>,
}

/// `[timeouts]` table, in seconds
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub request_secs: Option<TimeoutValue>,
    pub generic_secs: Option<TimeoutValue>,
}

/// A timeout as written in the file (number) or the environment (text)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TimeoutValue {
    Secs(u64),
    Raw(String),
}

impl TimeoutValue {
    /// Positive number of seconds, or `None` for zero and non-numeric text
    fn secs(&self) -> Option<u64> {
        let secs = match self {
            TimeoutValue::Secs(secs) => *secs,
            TimeoutValue::Raw(raw) => raw.trim().parse().ok()?,
        };
        (secs > 0).then_some(secs)
    }
}

/// Service paths for each tool, relative to the SAP host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServicePaths {
    pub business_partner: String,
    /// `{version}` is replaced by the caller-selected service version
    pub product_description: String,
    pub material_stock: String,
    pub internal_order_budget: String,
    /// Prefix for `post_to_sap` endpoints given without a scheme
    pub post_prefix: String,
    /// Relative to the BPA base URL
    pub bpa_task_instances: String,
}

impl Default for ServicePaths {
    fn default() -> Self {
        Self {
            business_partner: "sap/opu/odata/sap/API_BUSINESS_PARTNER/A_Customer".to_string(),
            product_description:
                "sap/opu/odata4/sap/api_product/srvd_a2x/sap/product/{version}/ProductDescription"
                    .to_string(),
            material_stock: "sap/opu/odata/sap/API_MATERIAL_STOCK_SRV/A_MatlStkInAcctMod"
                .to_string(),
            internal_order_budget:
                "sap/opu/odata/sap/ZINTERNAL_ORDER_BUDGET_SRV/InternalOrderBudgetSet".to_string(),
            post_prefix: "sap/opu/odata/sap".to_string(),
            bpa_task_instances: "public/workflow/rest/v1/task-instances".to_string(),
        }
    }
}

impl ServicePaths {
    /// ProductDescription entity set path for a given service version (e.g. "0002")
    pub fn product_description_for(&self, version: &str) -> String {
        self.product_description.replace("{version}", version)
    }
}

/// Validated BPA settings; only present when all four values are configured
#[derive(Debug)]
pub struct BpaSettings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub base_url: String,
}

/// Validated configuration the server runs with
#[derive(Debug)]
pub struct RuntimeConfig {
    pub endpoint: SapEndpoint,
    pub credentials: Option<BasicCredentials>,
    pub insecure_ssl: bool,
    pub bpa: Option<BpaSettings>,
    pub services: ServicePaths,
    pub request_timeout: Duration,
    pub generic_timeout: Duration,
}

impl Config {
    /// Load from an explicit file (which must exist) or the default file
    /// (which may be absent), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    tracing::debug!("No {} found, using environment only", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay values from an environment lookup. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SAP_HOST") {
            self.sap.host = Some(v);
        }
        if let Some(v) = get("SAP_PORT") {
            self.sap.port = Some(v);
        }
        if let Some(v) = get("SAP_CLIENT") {
            self.sap.client = Some(v);
        }
        if let Some(v) = get("AUTH_USERNAME") {
            self.sap.username = Some(v);
        }
        if let Some(v) = get("AUTH_PASSWORD") {
            self.sap.password = Some(SecretString::from(v));
        }
        if let Some(v) = get("SAP_INSECURE_SSL") {
            self.sap.insecure_ssl = Some(matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ));
        }

        if let Some(v) = get("BPA_TOKEN_URL") {
            self.bpa.token_url = Some(v);
        }
        if let Some(v) = get("BPA_CLIENT_ID") {
            self.bpa.client_id = Some(v);
        }
        if let Some(v) = get("BPA_CLIENT_SECRET") {
            self.bpa.client_secret = Some(SecretString::from(v));
        }
        if let Some(v) = get("BPA_BASE_URL") {
            self.bpa.base_url = Some(v);
        }

        if let Some(v) = get("SAP_REQUEST_TIMEOUT_SECS") {
            self.timeouts.request_secs = Some(TimeoutValue::Raw(v));
        }
        if let Some(v) = get("SAP_GENERIC_TIMEOUT_SECS") {
            self.timeouts.generic_secs = Some(TimeoutValue::Raw(v));
        }
    }

    /// Validate and convert to runtime configuration
    pub fn to_runtime(self) -> Result<RuntimeConfig, ConfigError> {
        let host = self.sap.host.ok_or(ConfigError::Missing("SAP_HOST"))?;

        let port = match self.sap.port.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_PORT,
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "SAP_PORT",
                message: format!("'{}' is not a valid port", raw),
            })?,
        };

        let client = self
            .sap
            .client
            .unwrap_or_else(|| DEFAULT_CLIENT.to_string());

        let endpoint = SapEndpoint::new(&host, port, &client)?;

        let credentials = match (self.sap.username, self.sap.password) {
            (Some(username), Some(password)) => Some(BasicCredentials::new(username, password)),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("AUTH_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("AUTH_USERNAME")),
        };

        let bpa = validate_bpa(self.bpa)?;

        let request_timeout = timeout(
            self.timeouts.request_secs,
            "SAP_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let generic_timeout = timeout(
            self.timeouts.generic_secs,
            "SAP_GENERIC_TIMEOUT_SECS",
            DEFAULT_GENERIC_TIMEOUT_SECS,
        )?;

        Ok(RuntimeConfig {
            endpoint,
            credentials,
            insecure_ssl: self.sap.insecure_ssl.unwrap_or(false),
            bpa,
            services: self.services,
            request_timeout,
            generic_timeout,
        })
    }
}

fn timeout(
    value: Option<TimeoutValue>,
    key: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(Duration::from_secs(default_secs)),
        Some(value) => value.secs().map(Duration::from_secs).ok_or_else(|| {
            let shown = match value {
                TimeoutValue::Secs(secs) => secs.to_string(),
                TimeoutValue::Raw(raw) => raw,
            };
            ConfigError::Invalid {
                key,
                message: format!("'{}' is not a positive number of seconds", shown),
            }
        }),
    }
}

/// BPA settings are all-or-nothing
fn validate_bpa(section: BpaSection) -> Result<Option<BpaSettings>, ConfigError> {
    let secret_set = section
        .client_secret
        .as_ref()
        .is_some_and(|s| !s.expose_secret().is_empty());

    match (
        section.token_url,
        section.client_id,
        section.client_secret,
        section.base_url,
    ) {
        (None, None, None, None) => Ok(None),
        (Some(token_url), Some(client_id), Some(client_secret), Some(base_url)) if secret_set => {
            for (key, value) in [("BPA_TOKEN_URL", &token_url), ("BPA_BASE_URL", &base_url)] {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(ConfigError::Invalid {
                        key,
                        message: "must include a URL scheme (http:// or https://)".to_string(),
                    });
                }
            }
            Ok(Some(BpaSettings {
                token_url,
                client_id,
                client_secret,
                base_url: base_url.trim_end_matches('/').to_string(),
            }))
        }
        (token_url, client_id, _, base_url) => {
            let missing = if token_url.is_none() {
                "BPA_TOKEN_URL"
            } else if client_id.is_none() {
                "BPA_CLIENT_ID"
            } else if !secret_set {
                "BPA_CLIENT_SECRET"
            } else if base_url.is_none() {
                "BPA_BASE_URL"
            } else {
                "BPA_*"
            };
            Err(ConfigError::Missing(missing))
        }
    }
}
