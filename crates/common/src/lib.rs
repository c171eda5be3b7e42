//! Ports and token lifecycle shared across Cadenza crates.
//!
//! - [`transport`]: the raw HTTP port every network call goes through
//! - [`auth`]: grants, token stores and the single-flight [`auth::TokenAuthority`]
//! - [`error`]: [`ErrorClassification`] for [`cadenza_domain::ApiError`]
//! - `testing`: mocks and fixtures (`test-utils` feature)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod error;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{ErrorClassification, ErrorSeverity};
