//! `MockInvoker`: a test double for `ServiceInvoker`.
//!
//! Useful in unit and integration tests where a real HTTP endpoint is either
//! unavailable or irrelevant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{InvokeError, Payload, Service, ServiceInvoker};

/// Behaviour injected per service name at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Answer with the request payload, unchanged.
    Echo,
    /// Answer with a fixed payload.
    Reply(Payload),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `n` calls, then echo.
    FlakyThenEcho(usize),
}

/// A mock invoker that records every call it receives and answers with a
/// programmer-specified result. Services with no configured behaviour fail
/// fatally.
#[derive(Debug, Default)]
pub struct MockInvoker {
    behaviours: HashMap<String, MockBehaviour>,
    /// All `(service name, request)` pairs seen by this invoker, in call order.
    pub calls: Arc<Mutex<Vec<(String, Payload)>>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.behaviours.insert(service.into(), behaviour);
        self
    }

    pub fn echo(self, service: impl Into<String>) -> Self {
        self.with(service, MockBehaviour::Echo)
    }

    /// Answer `service` with `value` serialised as JSON.
    pub fn replying_json(self, service: impl Into<String>, value: serde_json::Value) -> Self {
        self.with(service, MockBehaviour::Reply(Payload::json(&value)))
    }

    pub fn failing_retryable(self, service: impl Into<String>, msg: impl Into<String>) -> Self {
        self.with(service, MockBehaviour::FailRetryable(msg.into()))
    }

    pub fn failing_fatal(self, service: impl Into<String>, msg: impl Into<String>) -> Self {
        self.with(service, MockBehaviour::FailFatal(msg.into()))
    }

    pub fn flaky_then_echo(self, service: impl Into<String>, failures: usize) -> Self {
        self.with(service, MockBehaviour::FlakyThenEcho(failures))
    }

    /// Number of times `service` has been invoked.
    pub fn call_count(&self, service: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(name, _)| name == service).count()
    }

    /// Requests sent to `service`, in call order.
    pub fn requests(&self, service: &str) -> Vec<Payload> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of invocations across all services.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ServiceInvoker for MockInvoker {
    async fn invoke(&self, service: &Service, request: Payload) -> Result<Payload, InvokeError> {
        let previous_calls = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls.iter().filter(|(name, _)| *name == service.name).count();
            calls.push((service.name.clone(), request.clone()));
            previous
        };

        match self.behaviours.get(&service.name) {
            Some(MockBehaviour::Echo) => Ok(request),
            Some(MockBehaviour::Reply(payload)) => Ok(payload.clone()),
            Some(MockBehaviour::FailRetryable(msg)) => Err(InvokeError::Retryable(msg.clone())),
            Some(MockBehaviour::FailFatal(msg)) => Err(InvokeError::Fatal(msg.clone())),
            Some(MockBehaviour::FlakyThenEcho(failures)) if previous_calls < *failures => Err(
                InvokeError::Retryable(format!("flaky failure {}", previous_calls + 1)),
            ),
            Some(MockBehaviour::FlakyThenEcho(_)) => Ok(request),
            None => Err(InvokeError::Fatal(format!(
                "no mock behaviour registered for service '{}'",
                service.name
            ))),
        }
    }
}
