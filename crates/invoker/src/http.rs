//! HTTP implementation of [`ServiceInvoker`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument};

use crate::{InvokeError, Payload, Service, ServiceInvoker};

/// Sends `method url` with the request body and maps the reply back into a
/// [`Payload`].
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    /// Create an invoker whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvokeError::Fatal(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Create an invoker with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn parse_method(method: &str) -> Result<Method, InvokeError> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| InvokeError::Fatal(format!("invalid http method '{method}'")))
}

fn classify_transport(err: reqwest::Error) -> InvokeError {
    if err.is_builder() || err.is_request() && !err.is_timeout() && !err.is_connect() {
        InvokeError::Fatal(err.to_string())
    } else {
        InvokeError::Retryable(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &[u8]) -> InvokeError {
    let detail = String::from_utf8_lossy(body);
    let message = format!("service responded with {status}: {detail}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        InvokeError::Retryable(message)
    } else {
        InvokeError::Fatal(message)
    }
}

#[async_trait]
impl ServiceInvoker for HttpInvoker {
    #[instrument(skip(self, request), fields(service = %service.name, url = %service.url))]
    async fn invoke(&self, service: &Service, request: Payload) -> Result<Payload, InvokeError> {
        let method = parse_method(&service.method)?;

        let mut builder = self
            .client
            .request(method.clone(), &service.url)
            .header(ACCEPT, &service.produces);
        if method != Method::GET && method != Method::HEAD {
            builder = builder.header(CONTENT_TYPE, &request.mime).body(request.data);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| service.produces.clone());
        let body = response.bytes().await.map_err(classify_transport)?;

        debug!("{} {} -> {} ({} bytes)", method, service.url, status, body.len());

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        Ok(Payload::new(body.to_vec(), mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_normalised() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert_eq!(parse_method(" GET ").unwrap(), Method::GET);
        assert!(matches!(parse_method("NOT A METHOD"), Err(InvokeError::Fatal(_))));
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, b"").is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, b"").is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, b"missing").is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        let invoker = HttpInvoker::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is not expected to accept connections.
        let service = Service::json("down", "http://127.0.0.1:9/");
        let err = invoker
            .invoke(&service, Payload::json(&serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected: {err}");
    }
}
