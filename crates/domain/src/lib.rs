//! # Cadenza Domain
//!
//! Data types shared by the Cadenza client crates.
//!
//! This crate contains:
//! - Token snapshots and pagination envelopes
//! - The error taxonomy and Result definition
//! - Configuration structures
//! - Client-wide constants
//!
//! ## Architecture
//! - No dependencies on other Cadenza crates
//! - No I/O, no async runtime

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
