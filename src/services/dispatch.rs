//! Remote worker invocation over HTTP.
use crate::{
    error::{AppError, AppResult},
    middleware::{RequestId, REQUEST_ID_HEADER},
};
use reqwest::{Client as HttpClient, RequestBuilder};
use serde_json::Value;
use tracing::instrument;

/// Invokes worker endpoints by function name
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    /// Issues the invocation and returns without waiting for the worker.
    /// Errors cover only failing to issue it.
    async fn dispatch(&self, function: &str, body: Value) -> AppResult<()>;

    /// Invokes and waits for the worker's response; non-2xx is an error
    async fn invoke(&self, function: &str, body: Value) -> AppResult<Value>;
}

#[derive(Clone)]
pub struct HttpDispatcher {
    http_client: HttpClient,
    base_url: String,
    service_key: Option<String>,
}

impl HttpDispatcher {
    pub fn new(http_client: HttpClient, base_url: String, service_key: Option<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        }
    }

    fn url(&self, function: &str) -> String {
        format!("{}/{}", self.base_url, function)
    }

    fn request(&self, function: &str, body: &Value, request_id: RequestId) -> RequestBuilder {
        let request = self
            .http_client
            .post(self.url(function))
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .json(body);
        match &self.service_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for HttpDispatcher {
    #[instrument(skip(self, body))]
    async fn dispatch(&self, function: &str, body: Value) -> AppResult<()> {
        if function.trim().is_empty() {
            return Err(AppError::InvalidInput("Function name cannot be empty".to_string()));
        }

        let this = self.clone();
        let function = function.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.invoke(&function, body).await {
                tracing::error!(function = %function, error = %e, "Dispatched invocation failed");
            }
        });

        Ok(())
    }

    #[instrument(skip(self, body), fields(request_id = tracing::field::Empty))]
    async fn invoke(&self, function: &str, body: Value) -> AppResult<Value> {
        let request_id = RequestId::new();
        tracing::Span::current().record("request_id", tracing::field::display(request_id));
        tracing::debug!("Invoking worker");

        let response = self.request(function, &body, request_id).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "{} returned status {}: {}",
                function, status, body
            )));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_function_name() {
        let dispatcher = HttpDispatcher::new(
            HttpClient::new(),
            "http://localhost:3000/functions/".to_string(),
            None,
        );
        assert_eq!(
            dispatcher.url("full-refresh-titles"),
            "http://localhost:3000/functions/full-refresh-titles"
        );
    }

    #[test]
    fn test_request_carries_invocation_id_and_key() {
        let dispatcher = HttpDispatcher::new(
            HttpClient::new(),
            "http://localhost:3000/functions".to_string(),
            Some("service-key".to_string()),
        );
        let request_id = RequestId::new();

        let request = dispatcher
            .request("full-refresh-titles", &serde_json::json!({ "chunk": null }), request_id)
            .build()
            .unwrap();

        assert_eq!(request.headers()[REQUEST_ID_HEADER], request_id.to_string().as_str());
        assert_eq!(request.headers()["authorization"], "Bearer service-key");
        assert_eq!(request.url().path(), "/functions/full-refresh-titles");
    }

    #[tokio::test]
    async fn test_dispatch_rejects_blank_function() {
        let dispatcher = HttpDispatcher::new(HttpClient::new(), "http://x".to_string(), None);
        let result = dispatcher.dispatch("  ", Value::Null).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
