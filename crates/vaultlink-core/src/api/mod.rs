//! REST API plumbing for the control-plane backend.
//!
//! This module provides the `RequestExecutor` that every feature area goes
//! through to reach the backend: per-call timeouts, default and session
//! headers, and bounded retry with exponential backoff for transient
//! failures. The wire itself sits behind the `Transport` trait.

pub mod error;
pub mod executor;
pub mod health;
pub mod response;
pub mod transport;

pub use error::ApiError;
pub use executor::{ExecuteOptions, ExecutorConfig, RequestExecutor, RetryPolicy};
pub use health::{Connectivity, HealthMonitor};
pub use response::{ApiResponse, ResponseBody};
pub use transport::{Headers, HttpRequest, HttpResponse, HttpTransport, Method, Transport, TransportError};
