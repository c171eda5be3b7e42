//! Paginated collection envelopes returned by the catalog API

use serde::{Deserialize, Serialize};

/// Offset-paginated collection (`limit` / `offset` / `total`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub href: String,
    pub items: Vec<T>,
    pub limit: u32,
    #[serde(default)]
    pub next: Option<String>,
    pub offset: u32,
    #[serde(default)]
    pub previous: Option<String>,
    pub total: u32,
}

impl<T> Page<T> {
    /// A page with no items and no continuation.
    pub fn empty(limit: u32, offset: u32) -> Self {
        Self { href: String::new(), items: Vec::new(), limit, next: None, offset, previous: None, total: offset }
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Offset of the page that follows this one.
    pub fn next_offset(&self) -> u32 {
        self.offset.saturating_add(u32::try_from(self.items.len()).unwrap_or(u32::MAX))
    }
}

/// Cursor-paginated collection (`cursors.after`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    #[serde(default)]
    pub href: String,
    pub items: Vec<T>,
    pub limit: u32,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub cursors: Option<Cursors>,
    #[serde(default)]
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty(limit: u32) -> Self {
        Self { href: String::new(), items: Vec::new(), limit, next: None, cursors: None, total: None }
    }

    /// Cursor for the following page; `None` ends the walk.
    pub fn after(&self) -> Option<&str> {
        self.cursors.as_ref().and_then(|cursors| cursors.after.as_deref())
    }
}
