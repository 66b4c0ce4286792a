//! The `ServiceInvoker` trait: the contract every invoker must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::InvokeError;

pub const JSON_MIME: &str = "application/json";

fn default_method() -> String {
    "POST".to_string()
}

fn default_mime() -> String {
    JSON_MIME.to_string()
}

/// A named external endpoint referenced by workflow controls.
///
/// Defined here (in the invoker crate) so both the engine and individual
/// invoker implementations can import it without a circular dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Name used by controls to reference this service.
    pub name: String,
    pub url: String,
    /// HTTP method (e.g. `GET`, `POST`).
    #[serde(default = "default_method")]
    pub method: String,
    /// MIME type of the request body the service accepts.
    #[serde(default = "default_mime")]
    pub consumes: String,
    /// MIME type the service answers with.
    #[serde(default = "default_mime")]
    pub produces: String,
}

impl Service {
    /// A `POST` JSON-in/JSON-out service.
    pub fn json(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_method(),
            consumes: default_mime(),
            produces: default_mime(),
        }
    }
}

/// Raw bytes plus the MIME type describing them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Payload {
    pub data: Vec<u8>,
    pub mime: String,
}

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>, mime: impl Into<String>) -> Self {
        Self { data: data.into(), mime: mime.into() }
    }

    /// Serialise `value` as a JSON payload.
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            data: value.to_string().into_bytes(),
            mime: JSON_MIME.to_string(),
        }
    }

    /// `true` for `application/json` and `+json` suffixed types, ignoring
    /// parameters such as `charset`.
    pub fn is_json(&self) -> bool {
        let essence = self.mime.split(';').next().unwrap_or_default().trim();
        essence.eq_ignore_ascii_case(JSON_MIME) || essence.to_ascii_lowercase().ends_with("+json")
    }
}

/// Calls an external service.
///
/// Implementations send `request` to the endpoint described by `service`
/// and hand back the response body and MIME type. They never retry on their
/// own; wrap them in a [`RetryingInvoker`](crate::RetryingInvoker) for that.
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    async fn invoke(&self, service: &Service, request: Payload) -> Result<Payload, InvokeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_mime_detection_ignores_parameters_and_case() {
        assert!(Payload::new("{}", "application/json; charset=utf-8").is_json());
        assert!(Payload::new("{}", "Application/JSON").is_json());
        assert!(Payload::new("{}", "application/problem+json").is_json());
        assert!(!Payload::new("hi", "text/plain").is_json());
    }

    #[test]
    fn service_defaults_to_json_post() {
        let service: Service =
            serde_json::from_str(r#"{ "name": "echo", "url": "http://localhost/echo" }"#).unwrap();
        assert_eq!(service, Service::json("echo", "http://localhost/echo"));
    }
}
