//! Body encoding used by the middleware itself.
//!
//! Only the two encodings the token exchange needs live here: form bodies for
//! the request and path-aware JSON decoding for the reply.

use bytes::Bytes;

use crate::Result;

/// Content type for request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// JSON content type (`application/json`).
    Json,
    /// Form URL-encoded content type (`application/x-www-form-urlencoded`).
    FormUrlEncoded,
}

impl ContentType {
    /// Get the MIME type string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::FormUrlEncoded => "application/x-www-form-urlencoded",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialize a value to JSON bytes.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(Into::into)
}

/// Serialize a value to form URL-encoded bytes.
///
/// # Errors
///
/// Returns an error if form serialization fails.
///
/// # Example
///
/// ```
/// use credgate_core::to_form;
///
/// let pairs = vec![("grant_type", "client_credentials"), ("scope", "data:read")];
/// let bytes = to_form(&pairs).expect("serialize");
/// assert_eq!(bytes.as_ref(), b"grant_type=client_credentials&scope=data%3Aread");
/// ```
pub fn to_form<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_urlencoded::to_string(value)
        .map(|s| Bytes::from(s.into_bytes()))
        .map_err(Into::into)
}

/// Deserialize JSON bytes to a value with path-aware error messages.
///
/// # Errors
///
/// Returns [`crate::Error::JsonDeserialization`] naming the field that failed.
pub fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        crate::Error::json_deserialization(e.path().to_string(), e.inner().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_as_str() {
        assert_eq!(ContentType::Json.as_str(), "application/json");
        assert_eq!(
            ContentType::FormUrlEncoded.to_string(),
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn to_form_keeps_pair_order_and_escapes() {
        let pairs = vec![
            ("client_id", "id"),
            ("client_secret", "s3cr&t"),
            ("grant_type", "client_credentials"),
            ("scope", "data:read data:write"),
        ];

        let bytes = to_form(&pairs).expect("serialize");
        assert_eq!(
            bytes.as_ref(),
            b"client_id=id&client_secret=s3cr%26t&grant_type=client_credentials&scope=data%3Aread+data%3Awrite"
        );
    }

    #[test]
    fn from_json_missing_field_names_the_field() {
        #[derive(Debug, serde::Deserialize)]
        struct Token {
            #[allow(dead_code)]
            access_token: String,
        }

        let err = from_json::<Token>(br#"{"token_type":"Bearer"}"#).expect_err("should fail");
        let msg = err.to_string();
        assert!(msg.contains("access_token"), "unexpected message: {msg}");
    }

    #[test]
    fn from_json_syntax_error() {
        let err = from_json::<serde_json::Value>(b"not json").expect_err("should fail");
        assert_eq!(err.kind(), crate::ErrorKind::Deserialization);
    }
}
