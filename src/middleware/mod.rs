//! Middleware components for HTTP request processing.
//!
//! Request validation runs before routing and rejects traversal attempts early. Security
//! headers are applied to every response, with caching rules depending on the content type.

pub mod security_headers;
pub mod validation;
