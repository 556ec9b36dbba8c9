//! chainconn-http: HTTP transport for `chainconn-core`.
//!
//! [`HttpRpcClient`] speaks JSON-RPC over HTTP POST (single and true batch
//! requests) and plain REST GETs for chains that expose one.
//! [`HttpTransportFactory`] turns endpoint configuration into clients,
//! resolving credentials into the URL or an auth header.

pub mod client;
pub mod factory;

pub use client::{HttpClientConfig, HttpRpcClient};
pub use factory::HttpTransportFactory;
