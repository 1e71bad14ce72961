//! HTTP transport for the collection endpoint
//!
//! [`Delivery`] is the seam between the flush protocol and the network: one
//! request per call, parsed JSON back on any success status, an error on
//! transport failure, timeout, or a non-success status. Retry policy lives
//! in the command manager, never here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use crate::config::DeliveryConfig;
use crate::error::{Error, Result};

/// Network transport contract
#[async_trait]
pub trait Delivery: Send + Sync {
    /// POST a JSON body, returning the parsed response body
    async fn post(&self, url: &str, body: &Value) -> Result<Value>;

    /// GET a resource, same failure contract as [`Delivery::post`]
    async fn get(&self, url: &str) -> Result<Value>;
}

/// reqwest-backed transport
///
/// Stateless beyond the pooled HTTP client; built once from configuration.
pub struct HttpDeliveryClient {
    http: reqwest::Client,
}

impl HttpDeliveryClient {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Delivery for HttpDeliveryClient {
    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        read_json(response).await
    }

    async fn get(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Delivery(format!("failed to parse response: {}", e)))
    } else {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Delivery(format!(
            "API error ({}): {}",
            status, error_text
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_valid_config() {
        let config = DeliveryConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(HttpDeliveryClient::new(&config).is_err());
    }

    #[test]
    fn test_client_with_valid_config() {
        assert!(HttpDeliveryClient::new(&DeliveryConfig::default()).is_ok());
    }
}
