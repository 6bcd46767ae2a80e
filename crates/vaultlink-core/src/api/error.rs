use std::time::Duration;

use thiserror::Error;

use super::response::ResponseBody;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Request to {endpoint} timed out after {}ms", timeout.as_millis())]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited { body: ResponseBody },

    #[error("Server error ({status}): {message}")]
    Server {
        status: u16,
        message: String,
        body: ResponseBody,
    },

    #[error("Request rejected ({status}): {message}")]
    Client {
        status: u16,
        message: String,
        body: ResponseBody,
    },

    #[error("Request failed after {attempts} attempts: {last}")]
    RequestFailed { attempts: u32, last: Box<ApiError> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pick a human-readable message out of an error body.
    ///
    /// The backend reports failures as `{"error": "..."}` or
    /// `{"message": "..."}`; anything else falls back to the raw text.
    fn message_from_body(status: u16, body: &ResponseBody) -> String {
        match body {
            ResponseBody::Json(value) => value
                .get("error")
                .or_else(|| value.get("message"))
                .and_then(|v| v.as_str())
                .map(Self::truncate_body)
                .unwrap_or_else(|| Self::truncate_body(&value.to_string())),
            ResponseBody::Text(text) if !text.trim().is_empty() => Self::truncate_body(text),
            _ => format!("HTTP {}", status),
        }
    }

    /// Classify a non-2xx response.
    pub fn from_status(status: u16, body: ResponseBody) -> Self {
        let message = Self::message_from_body(status, &body);
        match status {
            429 => ApiError::RateLimited { body },
            500..=599 => ApiError::Server {
                status,
                message,
                body,
            },
            _ => ApiError::Client {
                status,
                message,
                body,
            },
        }
    }

    /// Whether the executor may try the call again.
    ///
    /// Timeouts and client errors are terminal; transport failures,
    /// 5xx and 429 are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::RateLimited { .. } | ApiError::Server { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ApiError::Timeout { .. } => true,
            ApiError::RequestFailed { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status carried by the error, looking through `RequestFailed`.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            ApiError::RequestFailed { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Raw response body attached to the error, if any.
    pub fn body(&self) -> Option<&ResponseBody> {
        match self {
            ApiError::RateLimited { body }
            | ApiError::Server { body, .. }
            | ApiError::Client { body, .. } => Some(body),
            ApiError::RequestFailed { last, .. } => last.body(),
            _ => None,
        }
    }

    /// True for failures that mean the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout { .. } => true,
            ApiError::RequestFailed { last, .. } => last.is_connectivity(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_status_classification() {
        for status in [400u16, 401, 403, 404, 422] {
            let err = ApiError::from_status(status, ResponseBody::Empty);
            assert!(!err.is_retryable(), "{} should be terminal", status);
            assert_eq!(err.status(), Some(status));
        }
        for status in [429u16, 500, 502, 503] {
            let err = ApiError::from_status(status, ResponseBody::Empty);
            assert!(err.is_retryable(), "{} should be retryable", status);
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn test_message_prefers_error_field() {
        let body = ResponseBody::Json(json!({"success": false, "error": "Invalid password"}));
        match ApiError::from_status(401, body) {
            ApiError::Client { message, .. } => assert_eq!(message, "Invalid password"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_message_falls_back_to_status() {
        match ApiError::from_status(404, ResponseBody::Empty) {
            ApiError::Client { message, .. } => assert_eq!(message, "HTTP 404"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated"));
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert_eq!(ApiError::truncate_body("short"), "short");
    }

    #[test]
    fn test_request_failed_looks_through() {
        let err = ApiError::RequestFailed {
            attempts: 3,
            last: Box::new(ApiError::from_status(503, ResponseBody::Text("down".into()))),
        };
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_timeout());
        assert!(matches!(err.body(), Some(ResponseBody::Text(t)) if t == "down"));
    }
}
