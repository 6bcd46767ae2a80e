use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

/// Parsed response body.
///
/// JSON when the response declared a JSON content type and parsed cleanly,
/// raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// Parse raw bytes according to the response content type.
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return ResponseBody::Empty;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if is_json {
            match serde_json::from_str(&text) {
                Ok(value) => ResponseBody::Json(value),
                Err(_) => ResponseBody::Text(text),
            }
        } else {
            ResponseBody::Text(text)
        }
    }
}

/// Successful (2xx) response returned by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Decode the body into a typed payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to decode body: {}", e))),
            ResponseBody::Text(text) => serde_json::from_str(text)
                .map_err(|e| ApiError::InvalidResponse(format!("Expected JSON body: {}", e))),
            ResponseBody::Empty => Err(ApiError::InvalidResponse("Empty response body".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_parse_json_content_type() {
        let body = ResponseBody::parse(Some("application/json; charset=utf-8"), br#"{"ok":true}"#);
        assert_eq!(body, ResponseBody::Json(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_parse_text_and_empty() {
        assert_eq!(
            ResponseBody::parse(Some("text/plain"), b"{\"ok\":true}"),
            ResponseBody::Text("{\"ok\":true}".into())
        );
        assert_eq!(ResponseBody::parse(None, b""), ResponseBody::Empty);
    }

    #[test]
    fn test_malformed_json_kept_as_text() {
        let body = ResponseBody::parse(Some("application/json"), b"<html>oops</html>");
        assert_eq!(body, ResponseBody::Text("<html>oops</html>".into()));
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Deserialize)]
        struct Reply {
            success: bool,
        }
        let response = ApiResponse {
            status: 200,
            body: ResponseBody::Json(serde_json::json!({"success": true})),
        };
        assert!(response.json::<Reply>().unwrap().success);

        let empty = ApiResponse {
            status: 204,
            body: ResponseBody::Empty,
        };
        assert!(matches!(empty.json::<Reply>(), Err(ApiError::InvalidResponse(_))));
    }
}
