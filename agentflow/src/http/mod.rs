//! HTTP collaborator used by resilient agents.

#[cfg(feature = "http")]
mod reqwest_client;
mod service;

#[cfg(feature = "http")]
pub use reqwest_client::ReqwestHttpClient;
pub use service::{HttpMethod, HttpServiceCall};

use crate::errors::AgentflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Decoded body. Non-JSON bodies are carried as a string.
    pub body: Value,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns non-2xx responses into a `Transport` error.
    ///
    /// # Errors
    ///
    /// Returns `Transport` carrying the status code.
    pub fn error_for_status(self) -> Result<Self, AgentflowError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AgentflowError::transport(
                Some(self.status),
                format!("unexpected status {}", self.status),
            ))
        }
    }
}

/// Minimal HTTP client interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request with optional query parameters.
    async fn get(&self, url: &str, query: Option<Value>) -> Result<HttpResponse, AgentflowError>;

    /// Sends a POST request with a JSON body.
    async fn post(&self, url: &str, body: Value) -> Result<HttpResponse, AgentflowError>;
}
