//! Unit and API tests.
//!
//! ## Test Modules
//!
//! - **thumb_tests**: thumbnail cache coalescing, failure handling, revalidation and resizing
//! - **archive_tests**: manifests, streamed archives, the concurrency gate and body adapter
//! - **listing_tests**: directory listings, sorting, paging and breadcrumbs
//! - **config_tests**: configuration defaults and validation
//! - **error_tests**: error responses and request path validation
//! - **health_api_tests**: health, readiness, metrics and version endpoints
//! - **browse_api_tests**: file, thumbnail, listing and archive requests end to end
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test thumb_tests
//! cargo test browse_api_tests
//! # etc.
//! ```

pub mod archive_tests;
pub mod config_tests;
