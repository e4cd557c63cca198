//! SAP OData MCP Library
//!
//! Model Context Protocol server for SAP S/4HANA OData services
//! (OData v2 and v4) and SAP Build Process Automation, with an
//! optional REST wrapper over the same tools.

pub mod auth;
pub mod config;
pub mod mcp;
pub mod odata;
pub mod rest;
pub mod tools;

pub use auth::{BasicCredentials, TokenCache};
pub use config::{Config, RuntimeConfig};
pub use odata::{ODataError, SapClient, SapEndpoint, SapResponse};
pub use tools::{SapTools, ToolError, ToolOutput};
