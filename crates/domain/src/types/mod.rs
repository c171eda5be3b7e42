//! Data types shared across the client crates

pub mod page;
pub mod token;

pub use page::{CursorPage, Cursors, Page};
pub use token::TokenSnapshot;
