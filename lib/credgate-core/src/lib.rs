//! Core types and traits for the credgate HTTP middleware.
//!
//! This crate provides the foundational types used by credgate:
//! - [`Request`], [`RequestBuilder`] and [`RequestOptions`] - HTTP request types
//! - [`Response`] - HTTP response type
//! - [`Error`], [`ErrorKind`] and [`Result`] - Error handling
//! - [`HttpClient`] - Core client trait for HTTP execution
//! - [`Method`], [`StatusCode`] and [`header`] - re-exported from the `http` crate

mod body;
mod client;
mod error;
pub mod prelude;
mod request;
mod response;

pub use body::{ContentType, from_json, to_form, to_json};
pub use client::{HttpClient, HttpClientExt};
pub use error::{Error, ErrorKind, Result};
pub use request::{AUTHORIZATION, Request, RequestBuilder, RequestOptions};
pub use response::Response;

// Re-export http crate types for methods, status codes and headers
pub use http::{Method, StatusCode, header};
