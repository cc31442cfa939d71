//! HTTP response handling.
//!
//! [`Response`] provides access to status, headers, and body, plus the
//! `Retry-After` hint the retry policy honours.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

/// HTTP response with status, headers, and body.
#[derive(Debug, Clone)]
pub struct Response<B = Bytes> {
    status: u16,
    headers: HashMap<String, String>,
    body: B,
}

impl<B> Response<B> {
    /// Creates a new response.
    #[must_use]
    pub fn new(status: u16, headers: HashMap<String, String>, body: B) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Single header value by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Response body.
    #[must_use]
    pub const fn body(&self) -> &B {
        &self.body
    }

    /// Consume into body.
    #[must_use]
    pub fn into_body(self) -> B {
        self.body
    }

    /// Status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Status is 4xx.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status >= 400 && self.status < 500
    }

    /// Status is 5xx.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status >= 500 && self.status < 600
    }

    /// Delay requested by the server through a delta-seconds `Retry-After`.
    ///
    /// HTTP-date values are not interpreted.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

impl Response<Bytes> {
    /// Deserialize the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        crate::from_json(&self.body)
    }

    /// Get the response body as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid UTF-8.
    pub fn text(self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }

    /// Turn a non-2xx response into [`crate::Error::Http`].
    ///
    /// The message names the status and, when the body is readable text,
    /// appends it as details.
    ///
    /// # Errors
    ///
    /// Returns the HTTP error for any non-success status.
    pub fn error_for_status(self) -> crate::Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let reason = http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown");
        let mut message = format!(
            "server returned non-success status code {} ({reason})",
            self.status
        );
        let details = String::from_utf8_lossy(&self.body);
        if !details.trim().is_empty() {
            message.push_str(&format!("; details: {}", details.trim()));
        }

        Err(crate::Error::Http {
            status: self.status,
            message,
            retry_after: self.retry_after(),
            body: (!self.body.is_empty()).then_some(self.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_headers(status: u16, headers: &[(&str, &str)], body: &'static str) -> Response {
        let headers = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Response::new(status, headers, Bytes::from(body))
    }

    #[test]
    fn response_basic() {
        let response = with_headers(200, &[("Content-Type", "application/json")], r#"{"id":1}"#);

        assert_eq!(response.status(), 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_server_error());
    }

    #[test]
    fn retry_after_delta_seconds() {
        let response = with_headers(503, &[("Retry-After", "7")], "");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(7)));

        let response = with_headers(503, &[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")], "");
        assert_eq!(response.retry_after(), None);

        let response = with_headers(503, &[], "");
        assert_eq!(response.retry_after(), None);
    }

    #[test]
    fn error_for_status_passes_success() {
        let response = with_headers(201, &[], "created");
        let response = response.error_for_status().expect("success");
        assert_eq!(response.status(), 201);
    }

    #[test]
    fn error_for_status_includes_details() {
        let response = with_headers(400, &[], r#"{"error":"invalid_client"}"#);
        let err = response.error_for_status().expect_err("should fail");

        assert_eq!(err.status(), Some(400));
        let msg = err.to_string();
        assert!(msg.contains("400 (Bad Request)"), "unexpected message: {msg}");
        assert!(msg.contains("invalid_client"), "unexpected message: {msg}");
        assert!(err.body().is_some());
    }

    #[test]
    fn error_for_status_keeps_retry_after() {
        let response = with_headers(429, &[("Retry-After", "2")], "");
        let err = response.error_for_status().expect_err("should fail");

        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert!(err.body().is_none());
    }

    #[test]
    fn response_json() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Item {
            id: u64,
        }

        let response = with_headers(200, &[], r#"{"id":1}"#);
        let item: Item = response.json().expect("deserialize");
        assert_eq!(item, Item { id: 1 });
    }
}
