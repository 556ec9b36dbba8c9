//! Builds [`HttpRpcClient`]s from endpoint configuration.

use std::sync::Arc;

use chainconn_core::config::NetworkConfig;
use chainconn_core::endpoint::{EndpointConfig, API_KEY_PLACEHOLDER};
use chainconn_core::error::ConnectionError;
use chainconn_core::transport::{RpcTransport, TransportFactory};

use crate::client::{HttpClientConfig, HttpRpcClient};

/// Endpoint option naming the header that carries the credential when the
/// URL has no `{api_key}` placeholder. Defaults to `Authorization`.
pub const AUTH_HEADER_OPTION: &str = "auth_header";
/// Endpoint option with the prefix put before the credential in that header.
/// Defaults to `Bearer ` for `Authorization`, nothing otherwise.
pub const AUTH_SCHEME_OPTION: &str = "auth_scheme";
/// Endpoint option holding an object of static extra headers.
pub const HEADERS_OPTION: &str = "headers";

/// [`TransportFactory`] producing one HTTP client per endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportFactory {
    base: HttpClientConfig,
}

impl HttpTransportFactory {
    /// Factory whose clients start from `base` (user agent, shared headers).
    pub fn new(base: HttpClientConfig) -> Self {
        Self { base }
    }

    fn client_config(
        &self,
        network: &NetworkConfig,
        endpoint: &EndpointConfig,
    ) -> Result<HttpClientConfig, ConnectionError> {
        let mut config = self.base.clone().with_timeout(endpoint.timeout());

        if let Some(extra) = endpoint.options.get(HEADERS_OPTION) {
            let extra = extra.as_object().ok_or_else(|| ConnectionError::Configuration {
                network: network.name.clone(),
                reason: format!("option '{HEADERS_OPTION}' of {} must be a map", endpoint.url),
            })?;
            for (name, value) in extra {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                config = config.with_header(name.clone(), value);
            }
        }

        let secret = endpoint.resolve_credential(&network.name)?;
        if let Some(secret) = secret {
            if !endpoint.url.contains(API_KEY_PLACEHOLDER) {
                let header = endpoint.option_str(AUTH_HEADER_OPTION).unwrap_or("Authorization");
                let default_scheme = if header.eq_ignore_ascii_case("authorization") { "Bearer " } else { "" };
                let scheme = endpoint.option_str(AUTH_SCHEME_OPTION).unwrap_or(default_scheme);
                config = config.with_header(header, format!("{scheme}{secret}"));
            }
        }
        Ok(config)
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        network: &NetworkConfig,
        endpoint: &EndpointConfig,
    ) -> Result<Arc<dyn RpcTransport>, ConnectionError> {
        let url = endpoint.resolved_url(&network.name)?;
        let config = self.client_config(network, endpoint)?;
        let client = HttpRpcClient::new(url, config).map_err(|e| ConnectionError::Configuration {
            network: network.name.clone(),
            reason: format!("{}: {e}", endpoint.url),
        })?;
        tracing::debug!(network = %network.name, url = %client.url(), "http transport created");
        Ok(Arc::new(client))
    }
}
