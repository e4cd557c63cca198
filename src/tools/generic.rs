//! Passthrough calls: arbitrary service paths and POSTs

use reqwest::Method;
use serde_json::json;

use super::{Args, SapTools, ToolError, ToolOutput};
use crate::odata::{AuthMode, QueryRequest, ServiceUrl};

impl SapTools {
    /// Any method against any service path under the configured host.
    /// Returns the upstream body verbatim.
    pub(super) async fn generic_search(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let service_path = args.require_str("service_path")?;
        let method = parse_method(args.str_or("method", "GET"))?;
        let headers = args.string_map("headers")?;
        let params = args.string_map("params")?;

        let url = self.endpoint.service_url(service_path)?.with_params(params);
        let mut request = QueryRequest::new(method, url)
            .headers(headers)
            .timeout(self.generic_timeout);
        if let Some(data) = args.opt_str("data") {
            request = request.body(data);
        }

        let body = self.client.execute_text(&request).await.into_data()?;
        Ok(ToolOutput::Text(match body {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        }))
    }

    /// POST a payload. Relative endpoints resolve under the configured
    /// OData prefix; absolute ones are used as given, and only receive
    /// the configured credentials when they point at the configured host.
    pub(super) async fn post_to_sap(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let endpoint = args.require_str("endpoint")?;
        let payload = args.opt_str("payload").unwrap_or_default();
        let content_type = args.str_or("content_type", "application/json");
        let additional_headers = args.string_map("additional_headers")?;

        let (url, auth) = self.resolve_post_target(endpoint)?;

        let mut request = QueryRequest::new(Method::POST, url)
            .header("Content-Type", content_type)
            .header("Accept", "application/json")
            .header("X-Requested-With", "XMLHttpRequest")
            .headers(additional_headers)
            .auth(auth);
        if !payload.is_empty() {
            request = request.body(payload);
        }

        let response = self.client.execute_text(&request).await;
        if !response.success {
            return Err(ToolError::from(response));
        }

        Ok(ToolOutput::Json(json!({
            "success": true,
            "status_code": response.status_code,
            "status_message": "Success",
            "response_data": response.data,
            "url": response.url,
        })))
    }

    fn resolve_post_target(&self, endpoint: &str) -> Result<(ServiceUrl, AuthMode), ToolError> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            let url = ServiceUrl::parse(endpoint).ok_or_else(|| {
                ToolError::Validation(format!("endpoint '{}' is not a valid URL", endpoint))
            })?;
            let auth = self.auth_for(&url);
            return Ok((url, auth));
        }

        let path = format!(
            "{}/{}",
            self.services.post_prefix.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Ok((self.endpoint.service_url(&path)?, AuthMode::Basic))
    }
}

fn parse_method(raw: &str) -> Result<Method, ToolError> {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.as_str() {
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" | "MERGE" => {
            Method::from_bytes(upper.as_bytes())
                .map_err(|_| ToolError::Validation(format!("invalid HTTP method '{}'", raw)))
        }
        _ => Err(ToolError::Validation(format!(
            "unsupported HTTP method '{}'",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method(" Patch ").unwrap(), Method::PATCH);
        assert_eq!(parse_method("MERGE").unwrap().as_str(), "MERGE");
        assert!(parse_method("CONNECT").is_err());
        assert!(parse_method("G E T").is_err());
    }
}
