//! HTTP transport for upstream service APIs
//!
//! Thin reqwest wrapper producing the raw network operations the integration
//! client composes its failsafes around. One transport per configured
//! service, carrying that service's base URL, auth headers, and per-attempt
//! timeout.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, header};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ServiceConfig;
use crate::{Error, Result};

/// HTTP transport for one upstream service
#[derive(Debug)]
pub struct HttpTransport {
    /// Service name (for error attribution)
    service: String,
    /// HTTP client
    client: Client,
    /// Base URL of the upstream API
    base_url: Url,
    /// Custom headers (API keys etc.)
    headers: HashMap<String, String>,
}

impl HttpTransport {
    /// Create a new transport from a service's configuration.
    ///
    /// The reqwest client carries the per-attempt timeout so a hung upstream
    /// surfaces as a transient timeout rather than blocking the retry loop.
    pub fn new(service: &str, config: &ServiceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid base_url for '{service}': {e}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            service: service.to_string(),
            client,
            base_url,
            headers: config.headers.clone(),
        })
    }

    /// GET a JSON document from `path` (joined against the base URL)
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.join(path)?;
        debug!(service = %self.service, url = %url, "GET");

        let response = self
            .client
            .get(url)
            .headers(self.header_map())
            .send()
            .await?;

        self.read_json(response).await
    }

    /// POST a JSON body to `path` and return the JSON response
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.join(path)?;
        debug!(service = %self.service, url = %url, "POST");

        let response = self
            .client
            .post(url)
            .headers(self.header_map())
            .json(body)
            .send()
            .await?;

        self.read_json(response).await
    }

    /// Join a request path against the base URL
    fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Internal(format!("Invalid request path '{path}': {e}")))
    }

    /// Build the outgoing header map, skipping unparseable entries
    fn header_map(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (
                key.parse::<header::HeaderName>(),
                value.parse::<header::HeaderValue>(),
            ) {
                headers.insert(k, v);
            }
        }
        headers
    }

    /// Map the response status onto the error taxonomy, then decode JSON.
    ///
    /// 5xx responses classify as transient, 4xx as fatal; both carry the
    /// status so callers can tell them apart.
    async fn read_json(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                service: self.service.clone(),
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_for(base_url: &str) -> Result<HttpTransport> {
        let config = ServiceConfig {
            base_url: base_url.to_string(),
            ..ServiceConfig::default()
        };
        HttpTransport::new("media-server", &config)
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = transport_for("not a url").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_joins_paths_against_base() {
        let transport = transport_for("http://plex.local:32400/api/").unwrap();
        let url = transport.join("library/sections").unwrap();
        assert_eq!(url.as_str(), "http://plex.local:32400/api/library/sections");
    }

    #[test]
    fn test_skips_malformed_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), "secret".to_string());
        headers.insert("bad header name".to_string(), "value".to_string());

        let config = ServiceConfig {
            base_url: "http://localhost:1234".to_string(),
            headers,
            ..ServiceConfig::default()
        };
        let transport = HttpTransport::new("media-server", &config).unwrap();

        let map = transport.header_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("X-Api-Key").unwrap(), "secret");
    }
}
