//! Catalog API client
//!
//! Wires configuration, transport, token store, grant, authority, executor
//! and pagination together behind one handle.

use std::sync::Arc;

use cadenza_common::auth::{grant_from_config, FileTokenStore, MemoryTokenStore, TokenAuthority, TokenGrant, TokenStore};
use cadenza_common::transport::HttpTransport;
use cadenza_domain::{ApiError, Config, CursorPage, Page, Result, TokenSnapshot};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, instrument};

use super::executor::{Decoded, RequestExecutor};
use super::pagination::PaginationEngine;
use super::request::ApiRequest;
use crate::http::ReqwestTransport;

/// Authenticated client for the catalog API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    executor: RequestExecutor,
    pagination: PaginationEngine,
}

impl CatalogClient {
    /// Create a builder for fluent configuration
    pub fn builder(config: Config) -> CatalogClientBuilder {
        CatalogClientBuilder::new(config)
    }

    /// Client with the reqwest transport and the store named by the config.
    ///
    /// # Errors
    /// `ApiError::Config` when the configuration is inconsistent or the
    /// transport cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn authority(&self) -> &TokenAuthority {
        self.executor.authority()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn pagination(&self) -> &PaginationEngine {
        &self.pagination
    }

    /// Adopt the persisted snapshot, if any.
    ///
    /// # Errors
    /// `ApiError::Storage` if the store cannot be read.
    pub async fn restore_session(&self) -> Result<Option<TokenSnapshot>> {
        self.authority().load_persisted().await
    }

    /// Exchange an authorization code obtained out of band.
    ///
    /// # Errors
    /// Whatever the grant or the store reported.
    pub async fn authorize_with_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSnapshot> {
        self.authority().authorize_with_code(code, code_verifier).await
    }

    /// # Errors
    /// See [`RequestExecutor::perform`].
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<Decoded<T>> {
        self.executor.perform(request).await
    }

    /// GET `path` and decode the body.
    ///
    /// # Errors
    /// See [`RequestExecutor::fetch`].
    #[instrument(skip(self, query))]
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = query.iter().fold(ApiRequest::get(path), |request, (name, value)| request.query(*name, value));
        self.executor.fetch(request).await
    }

    /// # Errors
    /// See [`RequestExecutor::perform`].
    #[instrument(skip(self, body))]
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<Decoded<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.executor.perform(ApiRequest::post(path).json(body)?).await
    }

    /// # Errors
    /// See [`RequestExecutor::perform_unit`].
    #[instrument(skip(self, body))]
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.executor.perform_unit(ApiRequest::put(path).json(body)?).await
    }

    /// # Errors
    /// See [`RequestExecutor::perform_unit`].
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.executor.perform_unit(ApiRequest::delete(path)).await
    }

    /// Fetch a single offset page; out-of-range limits fail before any call.
    ///
    /// # Errors
    /// `ApiError::Validation` for a bad `limit`, otherwise as
    /// [`RequestExecutor::fetch`].
    pub async fn page<T: DeserializeOwned>(&self, path: &str, limit: u32, offset: u32) -> Result<Page<T>> {
        let limit = self.pagination.limits().validate(limit)?;
        self.executor.fetch(offset_request(path, limit, offset)).await
    }

    /// Every item of the offset collection at `path`, up to `max_items`.
    ///
    /// # Errors
    /// The first failing page request.
    #[instrument(skip(self))]
    pub async fn collect_all<T>(&self, path: &str, page_size: u32, max_items: Option<usize>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let executor = &self.executor;
        self.pagination
            .collect_all(page_size, max_items, move |limit, offset| executor.fetch(offset_request(path, limit, offset)))
            .await
    }

    /// Items of the offset collection at `path`, fetched as the stream is
    /// consumed.
    pub fn stream<'a, T>(&'a self, path: &'a str, page_size: u32, max_items: Option<usize>) -> BoxStream<'a, Result<T>>
    where
        T: DeserializeOwned + Send + 'a,
    {
        let executor = &self.executor;
        self.pagination
            .stream(page_size, max_items, move |limit, offset| executor.fetch(offset_request(path, limit, offset)))
    }

    /// Every item of the cursor collection at `path`, up to `max_items`.
    ///
    /// # Errors
    /// The first failing page request.
    #[instrument(skip(self))]
    pub async fn collect_all_cursor<T>(&self, path: &str, page_size: u32, max_items: Option<usize>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let executor = &self.executor;
        self.pagination
            .collect_all_cursor(page_size, max_items, move |limit, after| {
                executor.fetch::<CursorPage<T>>(cursor_request(path, limit, after))
            })
            .await
    }

    pub fn stream_cursor<'a, T>(
        &'a self,
        path: &'a str,
        page_size: u32,
        max_items: Option<usize>,
    ) -> BoxStream<'a, Result<T>>
    where
        T: DeserializeOwned + Send + 'a,
    {
        let executor = &self.executor;
        self.pagination.stream_cursor(page_size, max_items, move |limit, after| {
            executor.fetch::<CursorPage<T>>(cursor_request(path, limit, after))
        })
    }

    /// Continue a page embedded in a larger resource through its `next` links.
    ///
    /// # Errors
    /// The first failing page request.
    pub async fn follow_next<T: DeserializeOwned>(&self, first_page: Page<T>, max_items: Option<usize>) -> Result<Vec<T>> {
        self.pagination.follow_next(&self.executor, first_page, max_items).await
    }
}

fn offset_request(path: &str, limit: u32, offset: u32) -> ApiRequest {
    ApiRequest::get(path).query("limit", limit).query("offset", offset)
}

fn cursor_request(path: &str, limit: u32, after: Option<String>) -> ApiRequest {
    let request = ApiRequest::get(path).query("limit", limit);
    match after {
        Some(after) => request.query("after", after),
        None => request,
    }
}

/// Builder for [`CatalogClient`]; every collaborator can be swapped.
pub struct CatalogClientBuilder {
    config: Config,
    transport: Option<Arc<dyn HttpTransport>>,
    store: Option<Arc<dyn TokenStore>>,
    grant: Option<Arc<dyn TokenGrant>>,
}

impl CatalogClientBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, transport: None, store: None, grant: None }
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn grant(mut self, grant: Arc<dyn TokenGrant>) -> Self {
        self.grant = Some(grant);
        self
    }

    /// # Errors
    /// `ApiError::Config` when the configuration is inconsistent or the
    /// transport cannot be built.
    pub fn build(self) -> Result<CatalogClient> {
        self.config.validate()?;
        let Config { client, credentials } = self.config;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(&client).map_err(|err| match err {
                ApiError::Config(_) => err,
                other => ApiError::Config(format!("failed to build HTTP transport: {other}")),
            })?),
        };

        let store: Arc<dyn TokenStore> = match (self.store, &credentials.token_cache_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileTokenStore::new(path.clone())),
            (None, None) => Arc::new(MemoryTokenStore::new()),
        };

        let grant = match self.grant {
            Some(grant) => grant,
            None => grant_from_config(&credentials, &client.accounts_base_url, Arc::clone(&transport))?,
        };

        let authority = TokenAuthority::with_refresh_margin(grant, store, client.refresh_margin());
        info!(grant = %authority.grant_kind(), api = %client.api_base_url, "catalog client ready");

        Ok(CatalogClient {
            executor: RequestExecutor::new(transport, authority, &client),
            pagination: PaginationEngine::new(client.page_limits),
        })
    }
}
