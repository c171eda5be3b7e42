//! Request descriptions and their de-duplication fingerprint

use bytes::Bytes;
use cadenza_common::transport::HttpMethod;
use cadenza_domain::{ApiError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

/// One call against the catalog API, before a token is attached
///
/// `path` is either relative to the configured API base URL or an absolute
/// URL (such as a page's `next` link), which is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    requires_user: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None, requires_user: false }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Serialize `body` as the JSON payload.
    ///
    /// # Errors
    /// Returns a validation error when `body` cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| ApiError::validation("body", format!("not serializable: {err}")))?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Mark the request as needing a user-authorized token.
    #[must_use]
    pub fn requires_user(mut self) -> Self {
        self.requires_user = true;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn needs_user(&self) -> bool {
        self.requires_user
    }

    /// Absolute URL with the query parameters appended.
    ///
    /// # Errors
    /// Returns a validation error for paths that do not form a valid URL.
    pub fn url(&self, api_base_url: &str) -> Result<Url> {
        let raw = if is_absolute(&self.path) {
            self.path.clone()
        } else {
            format!("{}/{}", api_base_url.trim_end_matches('/'), self.path.trim_start_matches('/'))
        };
        let mut url = Url::parse(&raw)
            .map_err(|err| ApiError::validation("path", format!("'{}' is not a valid URL: {err}", self.path)))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }

    /// Fingerprint used to coalesce identical concurrent calls.
    ///
    /// Keys on the resolved URL, so a relative path and the absolute `next`
    /// link naming the same resource coalesce.
    ///
    /// # Errors
    /// `ApiError::Validation` when the path does not resolve.
    pub fn key(&self, api_base_url: &str) -> Result<RequestKey> {
        Ok(RequestKey::new(self.method, &self.url(api_base_url)?, self.body.as_ref()))
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("https://") || path.starts_with("http://")
}

/// Canonical identity of a request: method, target, sorted query, body hash
///
/// Only used as the in-flight table key; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: HttpMethod,
    pub target: String,
    pub query: Vec<(String, String)>,
    pub body_digest: Option<String>,
}

impl RequestKey {
    pub fn new(method: HttpMethod, url: &Url, body: Option<&Bytes>) -> Self {
        let mut query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        query.sort();
        let mut target = url.clone();
        target.set_query(None);
        target.set_fragment(None);

        Self {
            method,
            target: target.to_string(),
            query,
            body_digest: body.map(|body| hex::encode(Sha256::digest(body))),
        }
    }
}
