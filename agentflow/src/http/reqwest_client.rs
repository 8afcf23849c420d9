//! `reqwest`-backed HTTP client.

use super::{HttpClient, HttpResponse};
use crate::errors::AgentflowError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// HTTP client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Creates a client with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, AgentflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentflowError::Configuration(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn decode(response: reqwest::Response) -> Result<HttpResponse, AgentflowError> {
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(HttpResponse::new(status, body))
    }
}

fn transport_error(err: reqwest::Error) -> AgentflowError {
    AgentflowError::transport(err.status().map(|s| s.as_u16()), err.to_string())
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, query: Option<Value>) -> Result<HttpResponse, AgentflowError> {
        let mut request = self.client.get(url);
        if let Some(query) = query {
            request = request.query(&query);
        }
        let response = request.send().await.map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn post(&self, url: &str, body: Value) -> Result<HttpResponse, AgentflowError> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }
}
