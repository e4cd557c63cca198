//! MCP Server implementation for SAP OData
//!
//! Exposes the SAP tools and routes JSON-RPC requests to them

use crate::mcp::protocol::*;
use crate::tools::{self, SapTools};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// MCP Server for SAP OData
pub struct SapMcpServer {
    tools: Arc<SapTools>,
}

impl SapMcpServer {
    /// Create a new MCP server instance
    pub fn new(tools: Arc<SapTools>) -> Self {
        Self { tools }
    }

    /// Get list of available tools
    pub fn get_tools(&self) -> Vec<Tool> {
        let mut list = Self::get_tools_static();
        if !self.tools.bpa_enabled() {
            list.retain(|t| t.name != tools::LIST_BPA_TASKS && t.name != tools::GET_BPA_TASK);
        }
        list
    }

    /// Full tool catalogue
    pub fn get_tools_static() -> Vec<Tool> {
        use crate::mcp::protocol::ParamType::{Boolean, Integer, Object, String as Str};

        vec![
            Tool {
                name: tools::SEARCH_CUSTOMER.to_string(),
                description: "Search customer numbers by description using the SAP Business Partner API (OData v2).".to_string(),
                input_schema: create_tool_schema(vec![
                    ("description", Str, "Text to search for, e.g. 'ACME'", true),
                    ("search_field", Str, "Field to search (default: CustomerName)", false),
                    ("exact_match", Boolean, "Exact match instead of substring (default: false)", false),
                    ("max_results", Integer, "Maximum records to return (default: 10)", false),
                    ("base_url", Str, "Full service URL overriding the configured one", false),
                ]),
            },
            Tool {
                name: tools::SEARCH_PRODUCT.to_string(),
                description: "Search ProductDescription (OData v4) by text, or fetch one description directly by product key and language.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("description", Str, "Text to search for (search mode)", false),
                    ("product", Str, "Product number (direct key mode)", false),
                    ("search_field", Str, "Field to search (default: ProductDescription)", false),
                    ("language", Str, "Language key (default: EN)", false),
                    ("exact_match", Boolean, "Exact match instead of substring (default: false)", false),
                    ("max_results", Integer, "Maximum records to return (default: 10)", false),
                    ("key_mode", Str, "Key encoding for direct lookups: 'segment', 'paren' or 'auto' (default)", false),
                    ("service_version", Str, "API_PRODUCT service version (default: 0002)", false),
                    ("base_url", Str, "Full service URL overriding the configured one", false),
                ]),
            },
            Tool {
                name: tools::MATERIAL_STOCK.to_string(),
                description: "Get material stock quantities per plant and storage location (API_MATERIAL_STOCK_SRV).".to_string(),
                input_schema: create_tool_schema(vec![
                    ("material", Str, "Material number", true),
                    ("plant", Str, "Restrict to a plant", false),
                    ("storage_location", Str, "Restrict to a storage location", false),
                    ("max_results", Integer, "Maximum records to return (default: 50)", false),
                ]),
            },
            Tool {
                name: tools::INTERNAL_ORDER_BUDGET.to_string(),
                description: "Get budget, actual, commitment and available amounts of an internal order.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("internal_order", Str, "Internal order number", true),
                    ("fiscal_year", Str, "Restrict to a fiscal year, e.g. '2024'", false),
                ]),
            },
            Tool {
                name: tools::GENERIC_SEARCH.to_string(),
                description: "Generic SAP OData call (v2/v4) against any service path on the configured host. Returns the raw response body.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("service_path", Str, "Service path, e.g. 'sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder'", true),
                    ("method", Str, "HTTP method (default: GET)", false),
                    ("headers", Object, "Additional request headers", false),
                    ("params", Object, "Query parameters, e.g. {\"$top\": \"5\"}", false),
                    ("data", Str, "Request body", false),
                ]),
            },
            Tool {
                name: tools::POST_TO_SAP.to_string(),
                description: "POST a payload to an SAP service. Relative endpoints resolve under sap/opu/odata/sap on the configured host.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("endpoint", Str, "Service path or absolute URL", true),
                    ("payload", Str, "Request body", true),
                    ("content_type", Str, "Content type (default: application/json)", false),
                    ("additional_headers", Object, "Additional request headers", false),
                ]),
            },
            Tool {
                name: tools::LIST_BPA_TASKS.to_string(),
                description: "List SAP Build Process Automation task instances, newest first.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("status", Str, "READY, RESERVED, IN_PROGRESS, COMPLETED or CANCELED", false),
                    ("max_results", Integer, "Maximum tasks to return (default: 20)", false),
                ]),
            },
            Tool {
                name: tools::GET_BPA_TASK.to_string(),
                description: "Get one SAP Build Process Automation task instance by id.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("task_id", Str, "Task instance id", true),
                ]),
            },
        ]
    }

    /// Handle a tool call
    pub async fn call_tool(&self, name: &str, args: &HashMap<String, Value>) -> CallToolResult {
        match self.tools.call(name, args).await {
            Ok(output) => CallToolResult::text(output.render()),
            Err(e) => CallToolResult::error(tools::pretty(&e.to_payload())),
        }
    }

    /// Handle one JSON-RPC message. Notifications get no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!("Notification: {}", request.method);
            return None;
        }
        let id = request.id.clone();

        let response = match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: Some(false),
                        }),
                    },
                    server_info: ServerInfo {
                        name: "sap-odata-mcp".to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                    instructions: Some(format!(
                        "SAP OData tools for {} (sap-client {})",
                        self.tools.endpoint().root(),
                        self.tools.endpoint().client()
                    )),
                };
                to_response(id, &result)
            }

            "tools/list" => to_response(
                id,
                &ListToolsResult {
                    tools: self.get_tools(),
                },
            ),

            "tools/call" => {
                let params: CallToolParams = match request.params {
                    Some(p) => match serde_json::from_value(p) {
                        Ok(params) => params,
                        Err(e) => {
                            return Some(JsonRpcResponse::error(
                                id,
                                INVALID_PARAMS,
                                &format!("Invalid params: {}", e),
                            ));
                        }
                    },
                    None => {
                        return Some(JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"));
                    }
                };

                let args = params.arguments.unwrap_or_default();
                let result = self.call_tool(&params.name, &args).await;
                to_response(id, &result)
            }

            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),

            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", request.method),
            ),
        };

        Some(response)
    }
}

fn to_response<T: serde::Serialize>(id: Option<Value>, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, -32603, &format!("Internal error: {}", e)),
    }
}
