//! Prelude module for convenient imports.
//!
//! ```ignore
//! use credgate_core::prelude::*;
//! ```

pub use crate::{
    Error, ErrorKind, HttpClient, HttpClientExt, Method, Request, RequestBuilder, RequestOptions,
    Response, Result,
};
