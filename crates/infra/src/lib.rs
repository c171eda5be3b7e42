//! # Cadenza Infrastructure
//!
//! Impure adapters and the authenticated request engine.
//!
//! This crate contains:
//! - [`http`]: the reqwest implementation of the transport port
//! - [`api`]: request executor, pagination engine and [`CatalogClient`]
//! - [`config`]: environment and file configuration loading
//! - [`errors`]: conversions from adapter errors into `ApiError`
//!
//! ## Architecture
//! - Implements ports defined in `cadenza-common`
//! - Depends on `cadenza-common` and `cadenza-domain`
//! - Contains all network and filesystem code

pub mod api;
pub mod config;
pub mod errors;
pub mod http;

// Re-export commonly used items
pub use api::{ApiRequest, CatalogClient, CatalogClientBuilder, Decoded, PaginationEngine, RawResponse, RequestExecutor};
pub use errors::InfraError;
pub use http::{ReqwestTransport, ReqwestTransportBuilder};
