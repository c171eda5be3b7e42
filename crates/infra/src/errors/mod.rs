//! Boundary conversions from adapter errors into [`cadenza_domain::ApiError`].

pub mod conversions;

pub use conversions::{transport_error, InfraError};
