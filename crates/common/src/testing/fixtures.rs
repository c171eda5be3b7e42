//! Token and page fixtures

use chrono::Utc;

use cadenza_domain::{Page, TokenSnapshot};

/// Snapshot valid for another hour.
pub fn fresh_snapshot(access_token: &str, refresh_token: Option<&str>) -> TokenSnapshot {
    TokenSnapshot::with_expiry(
        access_token,
        refresh_token.map(str::to_owned),
        Utc::now() + chrono::Duration::hours(1),
        None,
    )
}

/// Snapshot that expired one second ago.
pub fn expired_snapshot(access_token: &str, refresh_token: Option<&str>) -> TokenSnapshot {
    TokenSnapshot::with_expiry(
        access_token,
        refresh_token.map(str::to_owned),
        Utc::now() - chrono::Duration::seconds(1),
        None,
    )
}

/// Offset page over `items` with an absolute `next` link when `has_next`.
pub fn offset_page<T>(items: Vec<T>, offset: u32, total: u32, has_next: bool) -> Page<T> {
    let limit = u32::try_from(items.len()).unwrap_or(u32::MAX);
    let next_offset = offset.saturating_add(limit);
    Page {
        href: format!("https://api.example.com/v1/items?offset={offset}&limit={limit}"),
        items,
        limit,
        next: has_next.then(|| format!("https://api.example.com/v1/items?offset={next_offset}&limit={limit}")),
        offset,
        previous: None,
        total,
    }
}
