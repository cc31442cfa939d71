//! Prelude module for convenient imports.
//!
//! ```ignore
//! use credgate::prelude::*;
//! ```

pub use crate::middleware::{AuthLayer, AuthMiddleware, IdentityLayer, RefreshGate};
pub use crate::{
    AuthConfig, CancellationToken, ClientConfig, Error, ErrorKind, HttpClient, HttpClientExt,
    HyperClient, Method, Request, RequestBuilder, ResilienceConfig, Response, Result, StatusCode,
};
pub use serde::{Deserialize, Serialize};
