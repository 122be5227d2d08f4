//! Classified result of one request.

use fleetlink_core::{Error, Result};
use serde_json::Value;

/// Why a request produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ApiError {
    /// No address could be obtained and none was cached.
    #[error("Name resolution failed")]
    NameResolution,

    /// The transport failed (refused, reset, unreadable response).
    #[error("Connection failed")]
    ConnectionFailure,

    /// The exchange was aborted at its deadline.
    #[error("Request timed out")]
    Timeout,
}

/// Outcome of a request: a response of any status code, or a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Success(SuccessResponse),
    Failure(ApiError),
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The success variant, or `UnexpectedResponse` on a failure.
    pub fn success(&self) -> Result<&SuccessResponse> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Failure(error) => Err(Error::UnexpectedResponse(format!(
                "expected a response, request failed: {}",
                error
            ))),
        }
    }

    /// The failure kind, or `UnexpectedResponse` on a success.
    pub fn failure(&self) -> Result<ApiError> {
        match self {
            Self::Failure(error) => Ok(*error),
            Self::Success(response) => Err(Error::UnexpectedResponse(format!(
                "expected a failure, got HTTP {}",
                response.code()
            ))),
        }
    }

    pub fn into_success(self) -> Option<SuccessResponse> {
        match self {
            Self::Success(response) => Some(response),
            Self::Failure(_) => None,
        }
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessResponse {
    code: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl SuccessResponse {
    pub fn new(code: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            code,
            headers,
            body,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn is_2xx(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decoded JSON body of a 2xx `application/json` response.
    ///
    /// Anything else, including a malformed body, is `None`.
    pub fn json_body(&self) -> Option<Value> {
        self.try_json_body().ok()
    }

    /// Like [`json_body`](Self::json_body) but says why there is no body.
    pub fn try_json_body(&self) -> Result<Value> {
        if !self.is_2xx() {
            return Err(Error::UnexpectedResponse(format!(
                "HTTP {} has no JSON body",
                self.code
            )));
        }
        match self.content_type() {
            Some(content_type) if content_type.starts_with("application/json") => {
                Ok(serde_json::from_slice(&self.body)?)
            }
            other => Err(Error::Decode(format!(
                "content type {:?} is not application/json",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_response(code: u16, body: &str) -> SuccessResponse {
        SuccessResponse::new(
            code,
            vec![(
                "content-type".to_string(),
                "application/json; charset=utf-8".to_string(),
            )],
            body.as_bytes().to_vec(),
        )
    }

    #[test]
    fn test_json_body() {
        let response = json_response(200, r#"{"printers": []}"#);
        assert_eq!(response.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(response.json_body(), Some(json!({"printers": []})));
    }

    #[test]
    fn test_json_body_requires_json_content_type() {
        let response = SuccessResponse::new(
            200,
            vec![("Content-Type".to_string(), "text/plain".to_string())],
            b"{}".to_vec(),
        );
        assert!(response.json_body().is_none());
        assert!(matches!(response.try_json_body(), Err(Error::Decode(_))));
        assert_eq!(response.text(), "{}");
    }

    #[test]
    fn test_json_body_requires_success_code() {
        let response = json_response(500, r#"{"error": "boom"}"#);
        assert!(response.json_body().is_none());
        assert!(matches!(
            response.try_json_body(),
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_no_body() {
        let response = json_response(200, "{broken");
        assert!(response.json_body().is_none());
        assert!(matches!(response.try_json_body(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_variant_accessors() {
        let success = ApiResponse::Success(json_response(200, "{}"));
        assert!(success.success().is_ok());
        assert!(matches!(success.failure(), Err(Error::UnexpectedResponse(_))));

        let failure = ApiResponse::Failure(ApiError::Timeout);
        assert_eq!(failure.failure().unwrap(), ApiError::Timeout);
        assert!(matches!(failure.success(), Err(Error::UnexpectedResponse(_))));
        assert!(failure.into_success().is_none());
    }
}
