//! Client constants
//!
//! Centralized location for defaults shared by the configuration layer and
//! the runtime components.

// Service endpoints
pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_ACCOUNTS_BASE_URL: &str = "https://accounts.spotify.com";
pub const TOKEN_ENDPOINT_PATH: &str = "/api/token";

// Request execution
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1; // used when a 429 carries no Retry-After
pub const DEFAULT_USER_AGENT: &str = concat!("cadenza/", env!("CARGO_PKG_VERSION"));

// Token lifecycle
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 0;
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600; // assumed when expires_in is absent
pub const AUTO_REFRESH_RETRY_SECS: u64 = 60;

// Pagination
pub const MIN_PAGE_LIMIT: u32 = 1;
pub const MAX_PAGE_LIMIT: u32 = 50;
