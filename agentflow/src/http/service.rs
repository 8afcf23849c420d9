//! Ready-made service call over an [`HttpClient`].

use super::HttpClient;
use crate::agents::ServiceCall;
use crate::context::Payload;
use crate::errors::AgentflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// HTTP method used by [`HttpServiceCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Payload is sent as query parameters.
    #[default]
    Get,
    /// Payload is sent as a JSON body.
    Post,
}

/// Sends the payload to an endpoint and returns the decoded response body.
pub struct HttpServiceCall {
    service: String,
    url: String,
    method: HttpMethod,
    client: Arc<dyn HttpClient>,
}

impl HttpServiceCall {
    /// Creates a GET call.
    pub fn get(service: impl Into<String>, url: impl Into<String>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            service: service.into(),
            url: url.into(),
            method: HttpMethod::Get,
            client,
        }
    }

    /// Creates a POST call.
    pub fn post(service: impl Into<String>, url: impl Into<String>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            method: HttpMethod::Post,
            ..Self::get(service, url, client)
        }
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for HttpServiceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServiceCall")
            .field("service", &self.service)
            .field("url", &self.url)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceCall for HttpServiceCall {
    fn service_name(&self) -> &str {
        &self.service
    }

    async fn call(&self, input: &Payload) -> Result<Payload, AgentflowError> {
        let body = input.to_json()?;
        let response = match self.method {
            HttpMethod::Get => {
                let query = match body {
                    Value::Object(_) => Some(body),
                    Value::Null => None,
                    other => Some(serde_json::json!({ "q": other })),
                };
                self.client.get(&self.url, query).await?
            }
            HttpMethod::Post => self.client.post(&self.url, body).await?,
        };
        Ok(Payload::from(response.error_for_status()?.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockHttpClient};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_sends_scalar_as_query() {
        let mut client = MockHttpClient::new();
        client
            .expect_get()
            .withf(|_, query| query == &Some(json!({"q": "berlin"})))
            .returning(|_, _| Ok(HttpResponse::new(200, json!({"lat": 52.5}))));

        let call = HttpServiceCall::get("geo", "https://geo.test", Arc::new(client));
        let result = call.call(&Payload::from("berlin")).await.unwrap();

        assert_eq!(result.get("lat").and_then(Payload::as_f64), Some(52.5));
    }

    #[tokio::test]
    async fn test_post_surfaces_status_errors() {
        let mut client = MockHttpClient::new();
        client
            .expect_post()
            .returning(|_, _| Ok(HttpResponse::new(500, json!("boom"))));

        let call = HttpServiceCall::post("ingest", "https://ingest.test", Arc::new(client));
        let err = call.call(&Payload::from(json!({"a": 1}))).await.unwrap_err();

        assert!(matches!(err, AgentflowError::Transport { status: Some(500), .. }));
    }
}
