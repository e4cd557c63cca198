//! HTTP API republishing the SAP tools as plain REST endpoints.
//!
//! Every POST route takes the tool argument object as its JSON body and
//! goes through the same [`SapTools`] dispatch as MCP.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::tools::{self, SapTools, ToolError};

pub const DEFAULT_BIND: &str = "0.0.0.0:5002";

/// Application state
pub struct AppState {
    pub tools: Arc<SapTools>,
}

/// Tool arguments, or the reason the body could not be read as a JSON object
type Args = Result<Json<HashMap<String, Value>>, JsonRejection>;

/// Build the API router
pub fn router(tools: Arc<SapTools>) -> Router {
    let state = Arc::new(AppState { tools });

    let api_routes = Router::new()
        .route("/customer/search", post(customer_search_handler))
        .route("/product/search", post(product_search_handler))
        .route("/stock", post(stock_handler))
        .route("/budget", post(budget_handler))
        .route("/generic", post(generic_handler))
        .route("/post", post(post_handler))
        .route("/bpa/tasks", post(bpa_tasks_handler))
        .route("/bpa/tasks/{task_id}", get(bpa_task_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/sap", api_routes)
        .with_state(state)
}

/// Bind and serve until the listener fails
pub async fn serve(addr: SocketAddr, tools: Arc<SapTools>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("REST API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(tools)).await
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "SAP MCP Server",
    }))
}

async fn customer_search_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::SEARCH_CUSTOMER, args).await
}

async fn product_search_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::SEARCH_PRODUCT, args).await
}

async fn stock_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::MATERIAL_STOCK, args).await
}

async fn budget_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::INTERNAL_ORDER_BUDGET, args).await
}

async fn generic_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::GENERIC_SEARCH, args).await
}

async fn post_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::POST_TO_SAP, args).await
}

async fn bpa_tasks_handler(State(state): State<Arc<AppState>>, args: Args) -> Response {
    run_tool(&state, tools::LIST_BPA_TASKS, args).await
}

async fn bpa_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let args = HashMap::from([("task_id".to_string(), Value::String(task_id))]);
    run_tool(&state, tools::GET_BPA_TASK, Ok(Json(args))).await
}

async fn run_tool(state: &AppState, name: &str, args: Args) -> Response {
    let args = match args {
        Ok(Json(args)) => args,
        Err(rejection) => {
            tracing::warn!("Rejected {} request body: {}", name, rejection.body_text());
            return error_response(ToolError::Validation(rejection.body_text()));
        }
    };

    match state.tools.call(name, &args).await {
        Ok(output) => Json(json!({
            "success": true,
            "data": output.into_value(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: ToolError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(e.to_payload())).into_response()
}
