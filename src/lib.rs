//! # dirindex
//!
//! A file-browsing HTTP server. Every path under the configured root is either served as a file,
//! listed as a directory, or streamed as a ZIP archive of that directory. Image files can be
//! requested as small JPEG thumbnails that are generated on demand and cached on disk.
//!
//! ## Core Components
//!
//! - [`thumb`]: thumbnail cache with single-flight generation and atomic disk writes
//! - [`archive`]: directory manifests, the streaming ZIP writer and the archive concurrency gate
//! - [`listing`]: directory listings with README detection, sorting and gallery paging
//! - [`config`]: layered configuration (embedded defaults, `dirindex.toml`, environment)
//! - [`error`]: centralized error handling and HTTP error responses
//! - [`metrics`]: counters for thumbnails and archives
//! - [`middleware`]: request validation and security headers
//! - [`routes`]: HTTP endpoint handlers and the router
//! - [`state`]: shared application state
//! - [`types`]: query and response types

pub mod archive;
pub mod config;
pub mod error;
pub mod listing;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod thumb;
pub mod types;

#[cfg(test)]
mod tests;
