//! SAP business tools
//!
//! Each tool composes filter + URL construction, one request, envelope
//! normalization and field projection. Tools never panic on bad input or
//! upstream failures; everything comes back as a [`ToolError`].

mod bpa;
mod budget;
mod customer;
mod generic;
mod product;
mod stock;

pub use product::KeyMode;

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::auth::TokenCache;
use crate::config::{ConfigError, RuntimeConfig, ServicePaths};
use crate::odata::{
    AuthMode, FailureKind, ODataError, SapClient, SapEndpoint, SapResponse, ServiceUrl,
};

pub const SEARCH_CUSTOMER: &str = "searchCustomerByCustomerDescription";
pub const SEARCH_PRODUCT: &str = "searchProductByDescription";
pub const MATERIAL_STOCK: &str = "getMaterialStock";
pub const INTERNAL_ORDER_BUDGET: &str = "getInternalOrderBudget";
pub const GENERIC_SEARCH: &str = "generic_sap_search";
pub const POST_TO_SAP: &str = "post_to_sap";
pub const LIST_BPA_TASKS: &str = "listBpaTasks";
pub const GET_BPA_TASK: &str = "getBpaTask";

/// Tool failures, one variant per error class
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("{}", .0.error.as_deref().unwrap_or("Request failed"))]
    Request(Box<SapResponse>),

    #[error("ProductDescription lookup failed for {product}/{language}")]
    KeyLookup {
        product: String,
        language: String,
        attempts: Vec<KeyAttempt>,
    },
}

/// One failed direct-key attempt
#[derive(Debug, Clone, Serialize)]
pub struct KeyAttempt {
    pub mode: KeyMode,
    #[serde(flatten)]
    pub response: SapResponse,
}

impl From<ConfigError> for ToolError {
    fn from(e: ConfigError) -> Self {
        ToolError::Configuration(e.to_string())
    }
}

impl From<SapResponse> for ToolError {
    fn from(response: SapResponse) -> Self {
        match response.kind() {
            Some(FailureKind::Validation) => {
                ToolError::Validation(response.error.unwrap_or_default())
            }
            _ => ToolError::Request(Box::new(response)),
        }
    }
}

impl ToolError {
    /// Stable error class name used in payloads
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Configuration(_) => FailureKind::Configuration.as_str(),
            ToolError::Validation(_) => FailureKind::Validation.as_str(),
            ToolError::Request(response) => response
                .kind()
                .unwrap_or(FailureKind::Transport)
                .as_str(),
            ToolError::KeyLookup { attempts, .. } => attempts
                .last()
                .and_then(|a| a.response.kind())
                .unwrap_or(FailureKind::UpstreamHttp)
                .as_str(),
        }
    }

    /// Status for the REST wrapper
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            "validation" => 400,
            "upstream_http" => 502,
            _ => 500,
        }
    }

    /// Structured error document returned to callers
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "success": false,
            "kind": self.kind(),
            "error": self.to_string(),
        });

        match self {
            ToolError::Request(response) => {
                payload["status_code"] = json!(response.status_code);
                if let Some(ref details) = response.details {
                    payload["details"] = json!(details);
                }
                payload["url"] = json!(response.url);
            }
            ToolError::KeyLookup {
                product,
                language,
                attempts,
            } => {
                payload["product_key"] = json!(product);
                payload["language"] = json!(language);
                payload["attempts"] = json!(attempts);
            }
            _ => {}
        }

        payload
    }
}

/// Successful tool result
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Json(Value),
    /// Upstream body passed through verbatim
    Text(String),
}

impl ToolOutput {
    /// String returned to the MCP client: pretty JSON or the raw body
    pub fn render(&self) -> String {
        match self {
            ToolOutput::Json(value) => pretty(value),
            ToolOutput::Text(text) => text.clone(),
        }
    }

    /// JSON view for the REST wrapper; raw bodies are parsed when possible
    pub fn into_value(self) -> Value {
        match self {
            ToolOutput::Json(value) => value,
            ToolOutput::Text(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        }
    }
}

/// Pretty-print with two-space indentation
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Typed access to a flat tool argument object.
///
/// Clients are loose about JSON types, so numbers and booleans are also
/// accepted as strings.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a HashMap<String, Value>);

impl<'a> Args<'a> {
    pub fn new(args: &'a HashMap<String, Value>) -> Self {
        Self(args)
    }

    /// A string argument; empty strings count as absent
    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn str_or(&self, key: &str, default: &'a str) -> &'a str {
        self.opt_str(key).unwrap_or(default)
    }

    pub fn require_str(&self, key: &str) -> Result<&'a str, ToolError> {
        self.opt_str(key)
            .ok_or_else(|| ToolError::Validation(format!("missing required parameter: {}", key)))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ToolError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(default),
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(invalid_type(key, "a boolean")),
            },
            Some(_) => Err(invalid_type(key, "a boolean")),
        }
    }

    /// Integer argument; no range check is applied
    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, ToolError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid_type(key, "an integer")),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(default),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| invalid_type(key, "an integer")),
            Some(_) => Err(invalid_type(key, "an integer")),
        }
    }

    /// Object of scalar values (or a JSON string holding one)
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>, ToolError> {
        let object = match self.0.get(key) {
            None | Some(Value::Null) => return Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(s)) if s.trim().is_empty() => return Ok(BTreeMap::new()),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => return Err(invalid_type(key, "an object")),
            },
            Some(_) => return Err(invalid_type(key, "an object")),
        };

        object
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k, s)),
                Value::Number(_) | Value::Bool(_) => Ok((k, v.to_string())),
                _ => Err(ToolError::Validation(format!(
                    "{}.{} must be a string, number or boolean",
                    key, k
                ))),
            })
            .collect()
    }
}

fn invalid_type(key: &str, expected: &str) -> ToolError {
    ToolError::Validation(format!("parameter '{}' must be {}", key, expected))
}

/// Checks a caller-supplied property name before it goes into a filter
pub(crate) fn require_field_name(field: &str) -> Result<&str, ToolError> {
    if crate::odata::filter::is_valid_field_name(field) {
        Ok(field)
    } else {
        Err(ToolError::Validation(format!(
            "'{}' is not a valid OData property name",
            field
        )))
    }
}

/// The SAP tool set
#[derive(Debug)]
pub struct SapTools {
    client: Arc<SapClient>,
    endpoint: SapEndpoint,
    services: ServicePaths,
    bpa_base_url: Option<String>,
    generic_timeout: Duration,
}

impl SapTools {
    pub fn new(
        client: Arc<SapClient>,
        endpoint: SapEndpoint,
        services: ServicePaths,
        bpa_base_url: Option<String>,
        generic_timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint,
            services,
            bpa_base_url,
            generic_timeout,
        }
    }

    /// Build the HTTP client, token cache and tools from runtime config
    pub fn from_config(config: RuntimeConfig) -> Result<Self, ODataError> {
        let RuntimeConfig {
            endpoint,
            credentials,
            insecure_ssl,
            bpa,
            services,
            request_timeout,
            generic_timeout,
        } = config;

        let mut client = SapClient::new(credentials, request_timeout, insecure_ssl)?;
        let bpa_base_url = match bpa {
            Some(ref settings) => {
                let cache = TokenCache::from_settings(
                    settings,
                    client.http_client().clone(),
                    request_timeout,
                )?;
                client = client.with_token_cache(Arc::new(cache));
                Some(settings.base_url.clone())
            }
            None => None,
        };

        Ok(Self::new(
            Arc::new(client),
            endpoint,
            services,
            bpa_base_url,
            generic_timeout,
        ))
    }

    pub fn endpoint(&self) -> &SapEndpoint {
        &self.endpoint
    }

    pub fn bpa_enabled(&self) -> bool {
        self.bpa_base_url.is_some() && self.client.has_token_cache()
    }

    /// Dispatch a tool call by name
    pub async fn call(
        &self,
        name: &str,
        args: &HashMap<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let args = Args::new(args);
        tracing::debug!("Calling tool {}", name);

        let result = match name {
            SEARCH_CUSTOMER => self.search_customers(args).await,
            SEARCH_PRODUCT => self.search_products(args).await,
            MATERIAL_STOCK => self.material_stock(args).await,
            INTERNAL_ORDER_BUDGET => self.internal_order_budget(args).await,
            GENERIC_SEARCH => self.generic_search(args).await,
            POST_TO_SAP => self.post_to_sap(args).await,
            LIST_BPA_TASKS => self.list_bpa_tasks(args).await,
            GET_BPA_TASK => self.get_bpa_task(args).await,
            _ => Err(ToolError::Validation(format!("Unknown tool: {}", name))),
        };

        if let Err(ref e) = result {
            tracing::warn!("Tool {} failed ({}): {}", name, e.kind(), e);
        }
        result
    }

    /// Caller-supplied base URL override, or the configured service path,
    /// with the auth mode the target may receive
    fn base_url(
        &self,
        override_url: Option<&str>,
        service_path: &str,
    ) -> Result<(ServiceUrl, AuthMode), ToolError> {
        match override_url {
            Some(raw) => {
                let url = ServiceUrl::parse(raw).ok_or_else(|| {
                    ToolError::Validation(format!("base_url '{}' is not an http(s) URL", raw))
                })?;
                let auth = self.auth_for(&url);
                Ok((url, auth))
            }
            None => Ok((self.endpoint.service_url(service_path)?, AuthMode::Basic)),
        }
    }

    /// Basic credentials only go to the configured SAP host root
    fn auth_for(&self, url: &ServiceUrl) -> AuthMode {
        let root = self.endpoint.root();
        if url.path() == root || url.path().starts_with(&format!("{}/", root)) {
            AuthMode::Basic
        } else {
            tracing::warn!("{} is not on the configured SAP host; sending without credentials", url.path());
            AuthMode::Anonymous
        }
    }
}
