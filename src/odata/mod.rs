//! OData module
//!
//! URL and filter construction, request execution and response
//! normalization for SAP OData v2/v4 services

pub mod client;
pub mod filter;
pub mod normalize;
pub mod url;

pub use client::{AuthMode, FailureKind, ODataError, QueryRequest, SapClient, SapResponse};
pub use filter::{escape_literal, Filter, ODataVersion};
pub use normalize::{normalize_records, project};
pub use url::{SapEndpoint, ServiceUrl};
