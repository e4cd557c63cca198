//! Material stock lookup (API_MATERIAL_STOCK_SRV, OData v2)

use serde_json::{json, Value};

use super::{Args, SapTools, ToolError, ToolOutput};
use crate::odata::{normalize_records, project, Filter, QueryRequest};

const STOCK_FIELDS: &[&str] = &[
    "Material",
    "Plant",
    "StorageLocation",
    "Batch",
    "InventoryStockType",
    "MatlWrhsStkQtyInMatlBaseUnit",
    "MaterialBaseUnit",
];

impl SapTools {
    pub(super) async fn material_stock(&self, args: Args<'_>) -> Result<ToolOutput, ToolError> {
        let material = args.require_str("material")?;
        let plant = args.opt_str("plant");
        let storage_location = args.opt_str("storage_location");
        let max_results = args.int_or("max_results", 50)?;

        let filters = [
            Some(Filter::eq("Material", material)),
            plant.map(|p| Filter::eq("Plant", p)),
            storage_location.map(|s| Filter::eq("StorageLocation", s)),
        ];
        let filter = Filter::all(filters.into_iter().flatten())
            .ok_or_else(|| ToolError::Validation("empty stock filter".to_string()))?;

        let url = self
            .endpoint
            .service_url(&self.services.material_stock)?
            .with_param("$filter", filter)
            .with_param("$select", STOCK_FIELDS.join(","))
            .with_param("$top", max_results.to_string());

        let body = self
            .client
            .execute(&QueryRequest::get(url))
            .await
            .into_data()?;
        let stock: Vec<Value> = normalize_records(body)
            .iter()
            .map(|s| project(s, STOCK_FIELDS))
            .collect();

        let mut result = json!({
            "material": material,
            "found_entries": stock.len(),
            "stock": stock,
        });
        if let Some(plant) = plant {
            result["plant"] = json!(plant);
        }
        if let Some(storage_location) = storage_location {
            result["storage_location"] = json!(storage_location);
        }

        Ok(ToolOutput::Json(result))
    }
}
