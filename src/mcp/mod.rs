//! MCP Server implementation for SAP OData
//!
//! Exposes the SAP tools over JSON-RPC 2.0

pub mod protocol;
mod server;

pub use protocol::*;
pub use server::SapMcpServer;
