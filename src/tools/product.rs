//! ProductDescription search and direct key lookup (OData v4)

use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;

use super::{require_field_name, Args, KeyAttempt, SapTools, ToolError, ToolOutput};
use crate::odata::filter::quote_literal;
use crate::odata::url::encode_predicate;
use crate::odata::{
    normalize_records, project, AuthMode, FailureKind, Filter, ODataVersion, QueryRequest,
    SapResponse, ServiceUrl,
};

const PRODUCT_FIELDS: &[&str] = &["Product", "ProductDescription", "Language"];

/// How the entity key is encoded in a direct lookup URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// `.../ProductDescription/<product>/<language>`
    Segment,
    /// `.../ProductDescription(Product='<product>',Language='<language>')`
    Paren,
    /// Segment first, then paren
    Auto,
}

impl KeyMode {
    /// Concrete encodings to try, in order
    fn candidates(self) -> &'static [KeyMode] {
        match self {
            KeyMode::Segment => &[KeyMode::Segment],
            KeyMode::Paren => &[KeyMode::Paren],
            KeyMode::Auto => &[KeyMode::Segment, KeyMode::Paren],
        }
    }

    fn result_mode(self) -> &'static str {
        match self {
            KeyMode::Segment => "key_segment",
            KeyMode::Paren => "key_paren",
            KeyMode::Auto => "key_auto",
        }
    }

    fn key_url(self, base: &ServiceUrl, product: &str, language: &str) -> ServiceUrl {
        match self {
            KeyMode::Paren => base.clone().with_path_suffix(&format!(
                "(Product={},Language={})",
                encode_predicate(&quote_literal(product)),
                encode_predicate(&quote_literal(language))
            )),
            _ => base.clone().with_segment(product).with_segment(language),
        }
    }
}

impl FromStr for KeyMode {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "segment" => Ok(KeyMode::Segment),
            "paren" => Ok(KeyMode::Paren),
            "auto" => Ok(KeyMode::Auto),
            other => Err(ToolError::Validation(format!(
                "key_mode must be 'segment', 'paren' or 'auto', got '{}'",
                other
            ))),
        }
    }
}

/// In auto mode a rejected key encoding (400/404) or a transport failure
/// moves on to the next encoding
fn should_fall_back(response: &SapResponse) -> bool {
    match response.kind() {
        Some(FailureKind::UpstreamHttp) => matches!(response.status_code, 400 | 404),
        Some(FailureKind::Transport) => true,
        _ => false,
    }
}

impl SapTools {
    pub(super) async fn search_products(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let language = args.str_or("language", "EN");
        let version = args.str_or("service_version", "0002");
        if !version.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ToolError::Validation(format!(
                "service_version '{}' must be alphanumeric",
                version
            )));
        }

        let service_path = self.services.product_description_for(version);
        let (base, auth) = self.base_url(args.opt_str("base_url"), &service_path)?;

        if let Some(product) = args.opt_str("product") {
            let key_mode: KeyMode = args.str_or("key_mode", "auto").parse()?;
            return self.lookup_product(&base, auth, product, language, key_mode).await;
        }

        let description = args.opt_str("description").ok_or_else(|| {
            ToolError::Validation(
                "Provide either 'description' (search) or 'product' (direct key).".to_string(),
            )
        })?;
        let search_field = require_field_name(args.str_or("search_field", "ProductDescription"))?;
        let exact_match = args.bool_or("exact_match", false)?;
        let max_results = args.int_or("max_results", 10)?;

        let filter = Filter::matching(search_field, description, exact_match, ODataVersion::V4)
            .and(Filter::eq("Language", language));
        let url = base
            .with_param("$filter", filter)
            .with_param("$select", PRODUCT_FIELDS.join(","))
            .with_param("$top", max_results.to_string());

        let body = self
            .client
            .execute(&QueryRequest::get(url).auth(auth))
            .await
            .into_data()?;
        let products = project_products(normalize_records(body));
        let found = products.len();

        let mut result = json!({
            "mode": "search",
            "search_query": description,
            "search_field": search_field,
            "language": language,
            "exact_match": exact_match,
            "found_products": found,
            "products": products,
        });
        if found == 0 {
            result["message"] = json!(format!(
                "No products found matching: '{}' (lang={})",
                description, language
            ));
        }

        Ok(ToolOutput::Json(result))
    }

    async fn lookup_product(
        &self,
        base: &ServiceUrl,
        auth: AuthMode,
        product: &str,
        language: &str,
        key_mode: KeyMode,
    ) -> Result<ToolOutput, ToolError> {
        let mut attempts: Vec<KeyAttempt> = Vec::new();

        for &mode in key_mode.candidates() {
            let url = mode
                .key_url(base, product, language)
                .with_param("$select", PRODUCT_FIELDS.join(","));

            let request = QueryRequest::get(url).auth(auth);
            match self.client.execute(&request).await.into_data() {
                Ok(body) => {
                    let products = project_products(normalize_records(body));
                    return Ok(ToolOutput::Json(key_result(mode, product, language, products)));
                }
                Err(failed) => {
                    let fall_back = key_mode == KeyMode::Auto && should_fall_back(&failed);
                    tracing::debug!(
                        "Key lookup ({:?}) failed with {}; fall back: {}",
                        mode,
                        failed.status_code,
                        fall_back
                    );
                    attempts.push(KeyAttempt {
                        mode,
                        response: failed,
                    });
                    if !fall_back {
                        break;
                    }
                }
            }
        }

        if attempts.len() == 1 {
            if let Some(only) = attempts.pop() {
                return Err(ToolError::from(only.response));
            }
        }
        Err(ToolError::KeyLookup {
            product: product.to_string(),
            language: language.to_string(),
            attempts,
        })
    }
}

fn project_products(records: Vec<Value>) -> Vec<Value> {
    records
        .iter()
        .map(|p| project(p, PRODUCT_FIELDS))
        .collect()
}

fn key_result(mode: KeyMode, product: &str, language: &str, products: Vec<Value>) -> Value {
    let found = products.len();
    let mut result = json!({
        "mode": mode.result_mode(),
        "product_key": product,
        "language": language,
        "found_products": found,
        "products": products,
    });
    if found == 0 {
        result["message"] = json!(format!(
            "No ProductDescription found for {}/{}",
            product, language
        ));
    }
    result
}
