//! `invoker` crate: the `ServiceInvoker` trait and its implementations.
//!
//! The engine never talks to the network directly: every `Service` call goes
//! through a [`ServiceInvoker`] trait object, so the HTTP client, the retry
//! policy and the test double are interchangeable.

pub mod error;
pub mod traits;
pub mod http;
pub mod retry;
pub mod mock;

pub use error::InvokeError;
pub use traits::{Payload, Service, ServiceInvoker, JSON_MIME};
pub use http::HttpInvoker;
pub use retry::{RetryPolicy, RetryingInvoker};
