//! End-to-end tool calls against mocked SAP and OAuth2 endpoints

use httpmock::prelude::*;
use sap_odata_mcp::config::Config;
use sap_odata_mcp::tools::{self, SapTools, ToolError, ToolOutput};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_test::{assert_err, assert_ok};

const BASIC_DEMO_SECRET: &str = "Basic ZGVtbzpzZWNyZXQ=";

fn tools_for(server: &MockServer, with_bpa: bool) -> SapTools {
    let mut text = format!(
        r#"
[sap]
host = "{}"
client = "100"
username = "demo"
password = "secret"
"#,
        server.base_url()
    );
    if with_bpa {
        text.push_str(&format!(
            r#"
[bpa]
token_url = "{0}/oauth/token"
client_id = "bpa-client"
client_secret = "bpa-secret"
base_url = "{0}/bpa"
"#,
            server.base_url()
        ));
    }

    let runtime = Config::from_toml(&text).unwrap().to_runtime().unwrap();
    SapTools::from_config(runtime).unwrap()
}

fn args(value: Value) -> HashMap<String, Value> {
    serde_json::from_value(value).unwrap()
}

fn json_output(output: ToolOutput) -> Value {
    match output {
        ToolOutput::Json(value) => value,
        ToolOutput::Text(text) => panic!("expected JSON output, got text: {}", text),
    }
}

#[tokio::test]
async fn customer_search_escapes_quotes_and_flattens_v2_envelope() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sap/opu/odata/sap/API_BUSINESS_PARTNER/A_Customer")
                .query_param("sap-client", "100")
                .query_param("$filter", "substringof('O''Neil', CustomerName) eq true")
                .query_param("$select", "Customer,CustomerName,CustomerFullName")
                .query_param("$top", "10")
                .header("Authorization", BASIC_DEMO_SECRET);
            then.status(200).json_body(json!({
                "d": {"results": [
                    {"Customer": "1000", "CustomerName": "O'Neil GmbH", "__metadata": {"type": "A_CustomerType"}}
                ]}
            }));
        })
        .await;

    let tools = tools_for(&server, false);
    let output = assert_ok!(
        tools
            .call(tools::SEARCH_CUSTOMER, &args(json!({"description": "O'Neil"})))
            .await
    );

    mock.assert_async().await;
    let result = json_output(output);
    assert_eq!(result["found_customers"], 1);
    assert_eq!(result["search_field"], "CustomerName");
    assert_eq!(
        result["customers"][0],
        json!({"Customer": "1000", "CustomerName": "O'Neil GmbH", "CustomerFullName": ""})
    );
}

#[tokio::test]
async fn customer_search_passes_max_results_through() {
    let server = MockServer::start_async().await;
    let zero = server
        .mock_async(|when, then| {
            when.method(GET).query_param("$top", "0");
            then.status(200).json_body(json!({"d": {"results": []}}));
        })
        .await;
    let negative = server
        .mock_async(|when, then| {
            when.method(GET).query_param("$top", "-1");
            then.status(200).json_body(json!({"d": {"results": []}}));
        })
        .await;

    let tools = tools_for(&server, false);
    let empty = tools
        .call(
            tools::SEARCH_CUSTOMER,
            &args(json!({"description": "ACME", "max_results": 0})),
        )
        .await
        .unwrap();
    tools
        .call(
            tools::SEARCH_CUSTOMER,
            &args(json!({"description": "ACME", "max_results": -1})),
        )
        .await
        .unwrap();

    zero.assert_async().await;
    negative.assert_async().await;
    let result = json_output(empty);
    assert_eq!(result["found_customers"], 0);
    assert_eq!(result["message"], "No customers found matching: 'ACME'");
}

#[tokio::test]
async fn customer_search_upstream_failure_is_structured() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.any_request();
            then.status(500)
                .body(r#"{"error":{"message":{"value":"Internal error in backend"}}}"#);
        })
        .await;

    let tools = tools_for(&server, false);
    let err = tools
        .call(tools::SEARCH_CUSTOMER, &args(json!({"description": "ACME"})))
        .await
        .unwrap_err();

    assert!(matches!(err, ToolError::Request(_)));
    assert_eq!(err.kind(), "upstream_http");
    assert_eq!(err.http_status(), 502);
    let payload = err.to_payload();
    assert_eq!(payload["success"], false);
    assert_eq!(payload["status_code"], 500);
    assert!(payload["url"]
        .as_str()
        .unwrap()
        .contains("/API_BUSINESS_PARTNER/A_Customer?sap-client=100"));
}

#[tokio::test]
async fn customer_search_requires_description() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.any_request();
            then.status(200);
        })
        .await;

    let tools = tools_for(&server, false);
    let err = tools
        .call(tools::SEARCH_CUSTOMER, &args(json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "validation");
    mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn product_search_builds_v4_filter() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sap/opu/odata4/sap/api_product/srvd_a2x/sap/product/0002/ProductDescription")
                .query_param("$filter", "contains(ProductDescription, 'Bolt') and Language eq 'EN'")
                .query_param("$top", "10");
            then.status(200).json_body(json!({
                "@odata.context": "$metadata#ProductDescription",
                "value": [
                    {"Product": "TG11", "ProductDescription": "Bolt M8", "Language": "EN"}
                ]
            }));
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(
        tools
            .call(tools::SEARCH_PRODUCT, &args(json!({"description": "Bolt"})))
            .await
            .unwrap(),
    );

    mock.assert_async().await;
    assert_eq!(result["mode"], "search");
    assert_eq!(result["found_products"], 1);
    assert_eq!(result["products"][0]["Product"], "TG11");
}

#[tokio::test]
async fn product_lookup_auto_falls_back_to_paren_key() {
    let server = MockServer::start_async().await;
    let segment = server
        .mock_async(|when, then| {
            when.method(GET).path_includes("/ProductDescription/TG11/EN");
            then.status(404)
                .body(r#"{"error":{"code":"404","message":"Not found"}}"#);
        })
        .await;
    let paren = server
        .mock_async(|when, then| {
            when.method(GET).path_includes("ProductDescription(Product=");
            then.status(200).json_body(json!({
                "@odata.context": "$metadata#ProductDescription/$entity",
                "Product": "TG11",
                "ProductDescription": "Bolt M8",
                "Language": "EN"
            }));
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(
        tools
            .call(tools::SEARCH_PRODUCT, &args(json!({"product": "TG11"})))
            .await
            .unwrap(),
    );

    segment.assert_async().await;
    paren.assert_async().await;
    assert_eq!(result["mode"], "key_paren");
    assert_eq!(result["product_key"], "TG11");
    assert_eq!(
        result["products"],
        json!([{"Product": "TG11", "ProductDescription": "Bolt M8", "Language": "EN"}])
    );
}

#[tokio::test]
async fn product_lookup_auto_reports_both_attempts() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(404).body("not found");
        })
        .await;

    let tools = tools_for(&server, false);
    let err = tools
        .call(
            tools::SEARCH_PRODUCT,
            &args(json!({"product": "TG11", "language": "DE"})),
        )
        .await
        .unwrap_err();

    mock.assert_calls_async(2).await;
    let ToolError::KeyLookup { ref attempts, .. } = err else {
        panic!("expected aggregated key lookup error, got {:?}", err);
    };
    assert_eq!(attempts.len(), 2);

    let payload = err.to_payload();
    assert_eq!(payload["kind"], "upstream_http");
    assert_eq!(payload["product_key"], "TG11");
    assert_eq!(payload["language"], "DE");
    assert_eq!(payload["attempts"][0]["mode"], "segment");
    assert_eq!(payload["attempts"][0]["status_code"], 404);
    assert_eq!(payload["attempts"][1]["mode"], "paren");
    assert!(payload["attempts"][1]["url"]
        .as_str()
        .unwrap()
        .contains("(Product='TG11',Language='DE')"));
}

#[tokio::test]
async fn product_lookup_segment_mode_does_not_fall_back() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(404);
        })
        .await;

    let tools = tools_for(&server, false);
    let err = tools
        .call(
            tools::SEARCH_PRODUCT,
            &args(json!({"product": "TG11", "key_mode": "segment"})),
        )
        .await
        .unwrap_err();

    mock.assert_calls_async(1).await;
    assert!(matches!(err, ToolError::Request(_)));
}

#[tokio::test]
async fn product_lookup_paren_key_is_percent_encoded() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path_includes("ProductDescription(Product=")
                .query_param("sap-client", "100")
                .query_param("$select", "Product,ProductDescription,Language");
            then.status(200).json_body(json!({
                "Product": "A#1",
                "ProductDescription": "Hash part",
                "Language": "EN"
            }));
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(assert_ok!(
        tools
            .call(
                tools::SEARCH_PRODUCT,
                &args(json!({"product": "A#1", "key_mode": "paren"})),
            )
            .await
    ));

    mock.assert_calls_async(1).await;
    assert_eq!(result["mode"], "key_paren");
    assert_eq!(result["products"][0]["Product"], "A#1");
}

#[tokio::test]
async fn product_lookup_keeps_records_without_product() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path_includes("/ProductDescription/TG11/EN");
            then.status(200)
                .json_body(json!({"value": [{"ProductDescription": "Bolt M8", "Language": "EN"}]}));
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(assert_ok!(
        tools
            .call(
                tools::SEARCH_PRODUCT,
                &args(json!({"product": "TG11", "key_mode": "segment"})),
            )
            .await
    ));

    assert_eq!(result["found_products"], 1);
    assert_eq!(
        result["products"],
        json!([{"Product": "", "ProductDescription": "Bolt M8", "Language": "EN"}])
    );
}

#[tokio::test]
async fn product_search_needs_description_or_product() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.any_request();
            then.status(200);
        })
        .await;

    let tools = tools_for(&server, false);
    let err = tools
        .call(tools::SEARCH_PRODUCT, &args(json!({"language": "EN"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = tools
        .call(
            tools::SEARCH_PRODUCT,
            &args(json!({"product": "TG11", "key_mode": "path"})),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn material_stock_joins_filters() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sap/opu/odata/sap/API_MATERIAL_STOCK_SRV/A_MatlStkInAcctMod")
                .query_param("$filter", "Material eq 'M-01' and Plant eq '1010'")
                .query_param("$top", "50");
            then.status(200).json_body(json!({
                "d": {"results": [
                    {"Material": "M-01", "Plant": "1010", "StorageLocation": "0001",
                     "MatlWrhsStkQtyInMatlBaseUnit": "12.000", "MaterialBaseUnit": "PC"}
                ]}
            }));
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(
        tools
            .call(
                tools::MATERIAL_STOCK,
                &args(json!({"material": "M-01", "plant": "1010"})),
            )
            .await
            .unwrap(),
    );

    mock.assert_async().await;
    assert_eq!(result["material"], "M-01");
    assert_eq!(result["plant"], "1010");
    assert_eq!(result["found_entries"], 1);
    assert_eq!(result["stock"][0]["Batch"], "");
    assert_eq!(result["stock"][0]["MatlWrhsStkQtyInMatlBaseUnit"], "12.000");
}

#[tokio::test]
async fn internal_order_budget_filters_by_year() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sap/opu/odata/sap/ZINTERNAL_ORDER_BUDGET_SRV/InternalOrderBudgetSet")
                .query_param("$filter", "InternalOrder eq '400001' and FiscalYear eq '2024'");
            then.status(200).json_body(json!({
                "d": {"results": [
                    {"InternalOrder": "400001", "FiscalYear": "2024", "Currency": "EUR",
                     "BudgetAmount": "1000.00", "AvailableAmount": "250.00"}
                ]}
            }));
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(
        tools
            .call(
                tools::INTERNAL_ORDER_BUDGET,
                &args(json!({"internal_order": "400001", "fiscal_year": "2024"})),
            )
            .await
            .unwrap(),
    );
    mock.assert_async().await;
    assert_eq!(result["found_entries"], 1);
    assert_eq!(result["budgets"][0]["AvailableAmount"], "250.00");
    assert_eq!(result["budgets"][0]["ActualAmount"], "");

    let err = tools
        .call(
            tools::INTERNAL_ORDER_BUDGET,
            &args(json!({"internal_order": "400001", "fiscal_year": "24"})),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn generic_search_returns_raw_body() {
    let server = MockServer::start_async().await;
    let xml = r#"<?xml version="1.0"?><feed><entry/></feed>"#;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder")
                .query_param("sap-client", "100")
                .query_param("$top", "5")
                .header("Accept", "application/atom+xml");
            then.status(200).body(xml);
        })
        .await;

    let tools = tools_for(&server, false);
    let output = tools
        .call(
            tools::GENERIC_SEARCH,
            &args(json!({
                "service_path": "/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder",
                "params": {"$top": 5},
                "headers": {"Accept": "application/atom+xml"}
            })),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(output, ToolOutput::Text(xml.to_string()));
    assert_eq!(output.render(), xml);
}

#[tokio::test]
async fn post_to_sap_resolves_relative_endpoint() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/sap/opu/odata/sap/ZPURCHASE_SRV/Requests")
                .query_param("sap-client", "100")
                .header("X-Requested-With", "XMLHttpRequest")
                .header("Authorization", BASIC_DEMO_SECRET)
                .body_includes(r#""Quantity":"2""#);
            then.status(201).body(r#"{"d":{"RequestId":"77"}}"#);
        })
        .await;

    let tools = tools_for(&server, false);
    let result = json_output(
        tools
            .call(
                tools::POST_TO_SAP,
                &args(json!({
                    "endpoint": "ZPURCHASE_SRV/Requests",
                    "payload": r#"{"Quantity":"2"}"#
                })),
            )
            .await
            .unwrap(),
    );

    mock.assert_async().await;
    assert_eq!(result["success"], true);
    assert_eq!(result["status_code"], 201);
    assert_eq!(result["response_data"], r#"{"d":{"RequestId":"77"}}"#);
}

#[tokio::test]
async fn post_to_sap_keeps_credentials_off_foreign_hosts() {
    let sap = MockServer::start_async().await;
    let foreign = MockServer::start_async().await;
    let mock = foreign
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header_missing("Authorization");
            then.status(200).body("ok");
        })
        .await;

    let tools = tools_for(&sap, false);
    let result = json_output(
        tools
            .call(
                tools::POST_TO_SAP,
                &args(json!({"endpoint": foreign.url("/hook"), "payload": "{}"})),
            )
            .await
            .unwrap(),
    );

    mock.assert_async().await;
    assert_eq!(result["status_code"], 200);
}

#[tokio::test]
async fn base_url_override_keeps_credentials_off_foreign_hosts() {
    let sap = MockServer::start_async().await;
    let foreign = MockServer::start_async().await;
    let mock = foreign
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sap/opu/odata/sap/API_BUSINESS_PARTNER/A_Customer")
                .header_missing("Authorization");
            then.status(200)
                .json_body(json!({"d": {"results": [{"Customer": "9", "CustomerName": "Elsewhere"}]}}));
        })
        .await;

    let tools = tools_for(&sap, false);
    let base_url = foreign.url("/sap/opu/odata/sap/API_BUSINESS_PARTNER/A_Customer");
    let result = json_output(assert_ok!(
        tools
            .call(
                tools::SEARCH_CUSTOMER,
                &args(json!({"description": "Else", "base_url": base_url})),
            )
            .await
    ));

    mock.assert_async().await;
    assert_eq!(result["found_customers"], 1);
}

#[tokio::test]
async fn base_url_override_on_sap_host_sends_basic_auth() {
    let sap = MockServer::start_async().await;
    let mock = sap
        .mock_async(|when, then| {
            when.method(GET)
                .path("/custom/ProductDescription")
                .header("Authorization", BASIC_DEMO_SECRET);
            then.status(200).json_body(json!({"value": []}));
        })
        .await;

    let tools = tools_for(&sap, false);
    let result = json_output(assert_ok!(
        tools
            .call(
                tools::SEARCH_PRODUCT,
                &args(json!({"description": "Bolt", "base_url": sap.url("/custom/ProductDescription")})),
            )
            .await
    ));

    mock.assert_async().await;
    assert_eq!(result["found_products"], 0);
}

#[tokio::test]
async fn bpa_tasks_use_cached_bearer_token() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_includes("grant_type=client_credentials");
            then.status(200)
                .json_body(json!({"access_token": "tok-1", "token_type": "bearer", "expires_in": 3600}));
        })
        .await;
    let tasks = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/bpa/public/workflow/rest/v1/task-instances")
                .header("Authorization", "Bearer tok-1")
                .query_param("status", "READY")
                .query_param("$top", "20")
                .query_param("$orderby", "createdAt desc");
            then.status(200).json_body(json!([
                {"id": "t-1", "subject": "Approve PO 4711", "status": "READY", "priority": "HIGH"}
            ]));
        })
        .await;

    let tools = tools_for(&server, true);
    for _ in 0..2 {
        let result = json_output(
            tools
                .call(tools::LIST_BPA_TASKS, &args(json!({"status": "ready"})))
                .await
                .unwrap(),
        );
        assert_eq!(result["found_tasks"], 1);
        assert_eq!(result["status_filter"], "READY");
        assert_eq!(result["tasks"][0]["subject"], "Approve PO 4711");
        assert_eq!(result["tasks"][0]["processor"], "");
    }

    token.assert_calls_async(1).await;
    tasks.assert_calls_async(2).await;
}

#[tokio::test]
async fn bpa_task_by_id() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200)
                .json_body(json!({"access_token": "tok-2", "expires_in": 3600}));
        })
        .await;
    let task = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/bpa/public/workflow/rest/v1/task-instances/t-9")
                .header("Authorization", "Bearer tok-2");
            then.status(200).json_body(json!({
                "id": "t-9", "subject": "Release order", "status": "COMPLETED",
                "completedAt": "2024-05-01T10:00:00Z"
            }));
        })
        .await;

    let tools = tools_for(&server, true);
    let result = json_output(
        tools
            .call(tools::GET_BPA_TASK, &args(json!({"task_id": "t-9"})))
            .await
            .unwrap(),
    );

    task.assert_async().await;
    assert_eq!(result["task"]["status"], "COMPLETED");
    assert_eq!(result["task"]["completedAt"], "2024-05-01T10:00:00Z");
    assert_eq!(result["task"]["dueDate"], "");
}

#[tokio::test]
async fn bpa_tools_need_configuration() {
    let server = MockServer::start_async().await;
    let tools = tools_for(&server, false);
    assert!(!tools.bpa_enabled());

    let err = assert_err!(tools.call(tools::LIST_BPA_TASKS, &args(json!({}))).await);
    assert!(matches!(err, ToolError::Configuration(_)));
    assert_eq!(err.kind(), "configuration");
    assert_eq!(err.http_status(), 500);
}

#[tokio::test]
async fn bpa_rejects_unknown_status() {
    let server = MockServer::start_async().await;
    let tools = tools_for(&server, true);
    let err = assert_err!(
        tools
            .call(tools::LIST_BPA_TASKS, &args(json!({"status": "DONE"})))
            .await
    );
    assert_eq!(err.kind(), "validation");
}
