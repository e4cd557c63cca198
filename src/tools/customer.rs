//! Customer search against the Business Partner API (OData v2)

use serde_json::{json, Value};

use super::{require_field_name, Args, SapTools, ToolError, ToolOutput};
use crate::odata::{normalize_records, project, Filter, ODataVersion, QueryRequest};

const CUSTOMER_FIELDS: &[&str] = &["Customer", "CustomerName", "CustomerFullName"];

impl SapTools {
    pub(super) async fn search_customers(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let description = args.require_str("description")?;
        let search_field = require_field_name(args.str_or("search_field", "CustomerName"))?;
        let exact_match = args.bool_or("exact_match", false)?;
        let max_results = args.int_or("max_results", 10)?;

        let filter = Filter::matching(search_field, description, exact_match, ODataVersion::V2);
        let (base, auth) = self.base_url(args.opt_str("base_url"), &self.services.business_partner)?;
        let url = base
            .with_param("$filter", filter)
            .with_param("$select", CUSTOMER_FIELDS.join(","))
            .with_param("$top", max_results.to_string());

        let body = self
            .client
            .execute(&QueryRequest::get(url).auth(auth))
            .await
            .into_data()?;

        let customers: Vec<Value> = normalize_records(body)
            .iter()
            .map(|c| project(c, CUSTOMER_FIELDS))
            .collect();

        let found = customers.len();
        let mut result = json!({
            "search_query": description,
            "search_field": search_field,
            "exact_match": exact_match,
            "found_customers": found,
            "customers": customers,
        });
        if found == 0 {
            result["message"] = json!(format!("No customers found matching: '{}'", description));
        }

        Ok(ToolOutput::Json(result))
    }
}
