//! Internal order budget lookup (OData v2)

use serde_json::{json, Value};

use super::{Args, SapTools, ToolError, ToolOutput};
use crate::odata::{normalize_records, project, Filter, QueryRequest};

const BUDGET_FIELDS: &[&str] = &[
    "InternalOrder",
    "FiscalYear",
    "Currency",
    "BudgetAmount",
    "ActualAmount",
    "CommitmentAmount",
    "AvailableAmount",
];

impl SapTools {
    pub(super) async fn internal_order_budget(
        &self,
        args: Args<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let internal_order = args.require_str("internal_order")?;
        let fiscal_year = args.opt_str("fiscal_year");
        if let Some(year) = fiscal_year {
            if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
                return Err(ToolError::Validation(format!(
                    "fiscal_year '{}' must be a four digit year",
                    year
                )));
            }
        }

        let mut filter = Filter::eq("InternalOrder", internal_order);
        if let Some(year) = fiscal_year {
            filter = filter.and(Filter::eq("FiscalYear", year));
        }

        let url = self
            .endpoint
            .service_url(&self.services.internal_order_budget)?
            .with_param("$filter", filter)
            .with_param("$select", BUDGET_FIELDS.join(","));

        let body = self
            .client
            .execute(&QueryRequest::get(url))
            .await
            .into_data()?;
        let budgets: Vec<Value> = normalize_records(body)
            .iter()
            .map(|b| project(b, BUDGET_FIELDS))
            .collect();

        let mut result = json!({
            "internal_order": internal_order,
            "found_entries": budgets.len(),
            "budgets": budgets,
        });
        if let Some(year) = fiscal_year {
            result["fiscal_year"] = json!(year);
        }

        Ok(ToolOutput::Json(result))
    }
}
