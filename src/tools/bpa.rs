//! SAP Build Process Automation task queries (bearer token auth)

use serde_json::{json, Value};

use super::{Args, SapTools, ToolError, ToolOutput};
use crate::odata::{normalize_records, project, AuthMode, QueryRequest, ServiceUrl};

const TASK_FIELDS: &[&str] = &[
    "id",
    "subject",
    "status",
    "priority",
    "createdAt",
    "processor",
    "workflowInstanceId",
    "workflowDefinitionId",
];

const TASK_STATUSES: &[&str] = &["READY", "RESERVED", "IN_PROGRESS", "COMPLETED", "CANCELED"];

impl SapTools {
    fn bpa_tasks_url(&self) -> Result<ServiceUrl, ToolError> {
        let base = self
            .bpa_base_url
            .as_deref()
            .filter(|_| self.client.has_token_cache())
            .ok_or_else(|| {
                ToolError::Configuration(
                    "SAP Build Process Automation is not configured (set BPA_TOKEN_URL, \
                     BPA_CLIENT_ID, BPA_CLIENT_SECRET and BPA_BASE_URL)"
                        .to_string(),
                )
            })?;

        Ok(ServiceUrl::new(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.services.bpa_task_instances.trim_start_matches('/')
        )))
    }

    pub(super) async fn list_bpa_tasks(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let status = args.opt_str("status").map(str::to_ascii_uppercase);
        if let Some(ref s) = status {
            if !TASK_STATUSES.contains(&s.as_str()) {
                return Err(ToolError::Validation(format!(
                    "status must be one of {}",
                    TASK_STATUSES.join(", ")
                )));
            }
        }
        let max_results = args.int_or("max_results", 20)?;

        let mut url = self
            .bpa_tasks_url()?
            .with_param("$top", max_results.to_string())
            .with_param("$orderby", "createdAt desc");
        if let Some(ref s) = status {
            url = url.with_param("status", s.as_str());
        }

        let body = self
            .client
            .execute(&QueryRequest::get(url).auth(AuthMode::Bearer))
            .await
            .into_data()?;
        let tasks: Vec<Value> = normalize_records(body)
            .iter()
            .map(|t| project(t, TASK_FIELDS))
            .collect();

        Ok(ToolOutput::Json(json!({
            "status_filter": status,
            "found_tasks": tasks.len(),
            "tasks": tasks,
        })))
    }

    pub(super) async fn get_bpa_task(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let task_id = args.require_str("task_id")?;
        let url = self.bpa_tasks_url()?.with_segment(task_id);

        let body = self
            .client
            .execute(&QueryRequest::get(url).auth(AuthMode::Bearer))
            .await
            .into_data()?;

        let mut fields = TASK_FIELDS.to_vec();
        fields.extend(["description", "dueDate", "completedAt"]);
        let task = normalize_records(body).first().map(|t| project(t, &fields));

        Ok(ToolOutput::Json(match task {
            Some(task) => json!({ "task": task }),
            None => json!({
                "task": null,
                "message": format!("No data returned for task '{}'", task_id),
            }),
        }))
    }
}
