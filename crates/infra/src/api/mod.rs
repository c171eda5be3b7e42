//! Authenticated request engine for the catalog API
//!
//! - [`request`]: request descriptions and de-duplication keys
//! - [`executor`]: token attachment, in-flight sharing, 401/429 recovery
//! - [`pagination`]: offset and cursor walkers
//! - [`client`]: the [`CatalogClient`] facade
//!
//! Control flow: caller → pagination (optional) → executor → token
//! authority → transport → decode.

pub mod client;
pub mod errors;
pub mod executor;
pub mod pagination;
pub mod request;

pub use client::{CatalogClient, CatalogClientBuilder};
pub use errors::error_message;
pub use executor::{Decoded, RawResponse, RequestExecutor};
pub use pagination::PaginationEngine;
pub use request::{ApiRequest, RequestKey};
