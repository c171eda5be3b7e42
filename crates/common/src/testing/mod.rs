//! Testing utilities and helpers
//!
//! - **[`mocks`]**: scripted transport, counting grant, failing store
//! - **[`fixtures`]**: fresh/expired token snapshots and offset pages
//!
//! Available to other crates through the `test-utils` feature.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{expired_snapshot, fresh_snapshot, offset_page};
pub use mocks::{FailingTokenStore, MockResponse, MockTokenGrant, MockTransport};
