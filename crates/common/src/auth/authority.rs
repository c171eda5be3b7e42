//! Token authority with single-flight refresh
//!
//! Owns the token lifecycle for one set of credentials:
//! - Serves the cached snapshot while it is fresh, without I/O
//! - Refreshes at most once at a time, however many callers are waiting
//! - Writes every new snapshot through to the [`TokenStore`] before exposing it
//! - Optional background refresh that sleeps until the token is due
//!
//! The state mutex is never held across an await. Deciding whether a refresh
//! is pending and installing a new one happen in the same critical section,
//! and the pending operation is a [`Shared`] future every caller awaits. The
//! pending slot only keeps a weak handle, so a refresh whose last waiter was
//! cancelled is dropped and the next caller starts over.
//!
//! Store writes are serialized with logout: a refresh superseded by a logout
//! still resolves for its waiters but never writes to the store.

use std::sync::Arc;
use std::time::Duration;

use cadenza_domain::constants::AUTO_REFRESH_RETRY_SECS;
use cadenza_domain::{AuthError, Capability, GrantKind, Result, TokenSnapshot};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::traits::{TokenGrant, TokenStore};
use super::types::AuthorityStatus;
use crate::error::ErrorClassification;

type RefreshFuture = BoxFuture<'static, Result<TokenSnapshot>>;
type SharedRefresh = Shared<RefreshFuture>;

struct PendingRefresh {
    generation: u64,
    operation: WeakShared<RefreshFuture>,
}

impl AuthorityState {
    /// The pending refresh, if some waiter still holds it.
    fn live_refresh(&self) -> Option<(u64, SharedRefresh)> {
        let pending = self.pending.as_ref()?;
        pending.operation.upgrade().map(|operation| (pending.generation, operation))
    }
}

#[derive(Default)]
struct AuthorityState {
    cached: Option<TokenSnapshot>,
    pending: Option<PendingRefresh>,
    next_generation: u64,
}

struct AuthorityInner {
    grant: Arc<dyn TokenGrant>,
    store: Arc<dyn TokenStore>,
    refresh_margin: Duration,
    state: Mutex<AuthorityState>,
    /// Held across every store write and across logout.
    store_writes: tokio::sync::Mutex<()>,
    changes: watch::Sender<Option<TokenSnapshot>>,
}

/// Hands out valid access tokens for one grant
///
/// Cloning is cheap and every clone shares the same cache and pending
/// refresh.
#[derive(Clone)]
pub struct TokenAuthority {
    inner: Arc<AuthorityInner>,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("grant", &self.inner.grant.kind())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(grant: Arc<dyn TokenGrant>, store: Arc<dyn TokenStore>) -> Self {
        Self::with_refresh_margin(grant, store, Duration::ZERO)
    }

    /// Treat snapshots expiring within `refresh_margin` as stale.
    pub fn with_refresh_margin(
        grant: Arc<dyn TokenGrant>,
        store: Arc<dyn TokenStore>,
        refresh_margin: Duration,
    ) -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            inner: Arc::new(AuthorityInner {
                grant,
                store,
                refresh_margin,
                state: Mutex::new(AuthorityState::default()),
                store_writes: tokio::sync::Mutex::new(()),
                changes,
            }),
        }
    }

    pub fn grant_kind(&self) -> GrantKind {
        self.inner.grant.kind()
    }

    pub fn capability(&self) -> Capability {
        self.grant_kind().capability()
    }

    pub fn refresh_margin(&self) -> Duration {
        self.inner.refresh_margin
    }

    /// Return a usable snapshot, refreshing when needed.
    ///
    /// With `invalidating_previous` the cached snapshot is never served; the
    /// caller always waits for a network round trip (possibly one already in
    /// flight).
    ///
    /// # Errors
    /// `AuthError::MissingRefreshToken` when neither cache nor store can
    /// produce a token, otherwise whatever the grant or store reported.
    pub async fn access_token(&self, invalidating_previous: bool) -> Result<TokenSnapshot> {
        let operation = {
            let mut state = self.inner.state.lock();
            if !invalidating_previous {
                if let Some(snapshot) = state.cached.as_ref().filter(|s| self.inner.is_fresh(s)) {
                    return Ok(snapshot.clone());
                }
            }
            match state.live_refresh() {
                Some((generation, operation)) => {
                    debug!(generation, "joining pending token refresh");
                    operation
                }
                None => AuthorityInner::start_refresh(&self.inner, &mut state, invalidating_previous),
            }
        };
        operation.await
    }

    /// Called after the service rejected `rejected_access_token` with 401.
    ///
    /// A concurrent caller may already have replaced the rejected token; in
    /// that case the newer snapshot is returned without another refresh.
    ///
    /// # Errors
    /// Same as [`Self::access_token`].
    pub async fn refresh_after_rejection(&self, rejected_access_token: &str) -> Result<TokenSnapshot> {
        {
            let state = self.inner.state.lock();
            if let Some(snapshot) = state
                .cached
                .as_ref()
                .filter(|s| s.access_token != rejected_access_token && self.inner.is_fresh(s))
            {
                debug!("rejected token already replaced");
                return Ok(snapshot.clone());
            }
        }
        self.access_token(true).await
    }

    /// Adopt the stored snapshot as the cache, even if it has expired.
    ///
    /// An expired snapshot still carries the refresh token the next
    /// [`Self::access_token`] call needs.
    ///
    /// # Errors
    /// `ApiError::Storage` if the store cannot be read.
    pub async fn load_persisted(&self) -> Result<Option<TokenSnapshot>> {
        let stored = self.inner.store.load().await?;
        if let Some(snapshot) = stored.as_ref() {
            let adopted = {
                let mut state = self.inner.state.lock();
                let keep_cached = state.cached.as_ref().is_some_and(|cached| self.inner.is_fresh(cached));
                if !keep_cached {
                    state.cached = Some(snapshot.clone());
                }
                !keep_cached
            };
            if adopted {
                debug!(expires_at = %snapshot.expires_at, "adopted persisted token snapshot");
                self.inner.publish(Some(snapshot.clone()));
            }
        }
        Ok(stored)
    }

    /// Exchange an authorization code obtained out of band.
    ///
    /// # Errors
    /// Grant errors, or `ApiError::Storage` if the new snapshot cannot be
    /// persisted.
    #[instrument(skip_all, fields(grant = %self.grant_kind()))]
    pub async fn authorize_with_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSnapshot> {
        let snapshot = self.inner.grant.exchange_code(code, code_verifier).await?;
        info!(expires_at = %snapshot.expires_at, "authorization code exchanged");
        self.seed(snapshot).await
    }

    /// Persist and cache an externally obtained snapshot.
    ///
    /// # Errors
    /// `ApiError::Storage` if the store rejects the snapshot; the cache is
    /// left untouched in that case.
    pub async fn seed(&self, snapshot: TokenSnapshot) -> Result<TokenSnapshot> {
        self.inner.persist(&snapshot).await?;
        self.inner.state.lock().cached = Some(snapshot.clone());
        self.inner.publish(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Forget the cached and stored snapshot.
    ///
    /// A refresh already in flight still completes for its waiters but no
    /// longer updates the cache.
    ///
    /// # Errors
    /// `ApiError::Storage` if the store cannot be cleared.
    pub async fn logout(&self) -> Result<()> {
        let _writes = self.inner.store_writes.lock().await;
        {
            let mut state = self.inner.state.lock();
            state.cached = None;
            state.pending = None;
        }
        self.inner.publish(None);
        self.inner.store.clear().await?;
        info!("token authority logged out");
        Ok(())
    }

    pub fn status(&self) -> AuthorityStatus {
        let state = self.inner.state.lock();
        if state.live_refresh().is_some() {
            return AuthorityStatus::Refreshing;
        }
        match state.cached.as_ref() {
            None => AuthorityStatus::NoToken,
            Some(snapshot) if self.inner.is_fresh(snapshot) => AuthorityStatus::CachedValid,
            Some(_) => AuthorityStatus::CachedExpired,
        }
    }

    /// Snapshot currently cached, without any refresh.
    pub fn cached(&self) -> Option<TokenSnapshot> {
        self.inner.state.lock().cached.clone()
    }

    /// Observe every snapshot change (refresh, seed, logout).
    pub fn subscribe(&self) -> watch::Receiver<Option<TokenSnapshot>> {
        self.inner.changes.subscribe()
    }

    /// Keep the cached token fresh in the background.
    ///
    /// Wakes up only when the token is due (no polling) and refreshes through
    /// the same single-flight path as [`Self::access_token`]. Dropping the
    /// returned handle stops the task.
    pub fn spawn_auto_refresh(&self) -> AutoRefreshHandle {
        let authority = self.clone();
        let task = tokio::spawn(async move { authority.auto_refresh_loop().await });
        AutoRefreshHandle { task }
    }

    async fn auto_refresh_loop(self) {
        info!("starting token auto-refresh task");
        let retry_delay = Duration::from_secs(AUTO_REFRESH_RETRY_SECS);

        loop {
            let wait = match self.cached() {
                Some(snapshot) => self.inner.time_until_due(&snapshot),
                None => retry_delay,
            };
            if !wait.is_zero() {
                debug!(wait_secs = wait.as_secs(), "auto-refresh sleeping");
                tokio::time::sleep(wait).await;
            }

            // Logged out while sleeping.
            if self.cached().is_none() {
                continue;
            }
            if self.status() == AuthorityStatus::CachedValid {
                continue;
            }

            match self.access_token(false).await {
                Ok(snapshot) => debug!(expires_at = %snapshot.expires_at, "auto-refresh complete"),
                Err(err) => {
                    warn!(error = %err, retryable = err.is_retryable(), "auto-refresh failed");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
}

impl AuthorityInner {
    fn is_fresh(&self, snapshot: &TokenSnapshot) -> bool {
        !snapshot.is_expiring_within(self.refresh_margin)
    }

    fn time_until_due(&self, snapshot: &TokenSnapshot) -> Duration {
        let margin = chrono::Duration::from_std(self.refresh_margin).unwrap_or(chrono::Duration::MAX);
        snapshot
            .expires_at
            .checked_sub_signed(margin)
            .and_then(|due| (due - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    fn publish(&self, snapshot: Option<TokenSnapshot>) {
        self.changes.send_replace(snapshot);
    }

    /// Install a new pending refresh. Caller holds the state lock.
    fn start_refresh(this: &Arc<Self>, state: &mut AuthorityState, invalidating: bool) -> SharedRefresh {
        let generation = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);
        let cached = state.cached.clone();

        let inner = Arc::clone(this);
        let operation = async move {
            let outcome = inner.resolve(generation, cached, invalidating).await;
            inner.complete(generation, &outcome);
            outcome
        }
        .boxed()
        .shared();

        state.pending = operation.downgrade().map(|operation| PendingRefresh { generation, operation });
        operation
    }

    /// Walk cache, then store, then grant, until something yields a token.
    async fn resolve(
        &self,
        generation: u64,
        cached: Option<TokenSnapshot>,
        invalidating: bool,
    ) -> Result<TokenSnapshot> {
        if let Some(refresh_token) = cached.and_then(|s| s.refresh_token).filter(|t| !t.is_empty()) {
            return self.refresh_with(generation, &refresh_token).await;
        }

        if let Some(stored) = self.load_store().await {
            if !invalidating && self.is_fresh(&stored) {
                debug!("serving persisted token snapshot");
                return Ok(stored);
            }
            if let Some(refresh_token) = stored.refresh_token.as_deref().filter(|t| !t.is_empty()) {
                return self.refresh_with(generation, refresh_token).await;
            }
        }

        if self.grant.kind() == GrantKind::ClientCredentials {
            info!("requesting app token");
            let snapshot = self.grant.acquire().await?;
            self.persist_refreshed(generation, &snapshot).await?;
            return Ok(snapshot);
        }

        warn!("no refresh token available, re-authorization required");
        Err(AuthError::MissingRefreshToken.into())
    }

    #[instrument(skip_all, fields(grant = %self.grant.kind()))]
    async fn refresh_with(&self, generation: u64, refresh_token: &str) -> Result<TokenSnapshot> {
        info!("refreshing access token");
        let snapshot = match self.grant.refresh(refresh_token).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                return Err(err);
            }
        };
        self.persist_refreshed(generation, &snapshot).await?;
        info!(expires_at = %snapshot.expires_at, "access token refreshed");
        Ok(snapshot)
    }

    /// Store failures while loading only cost us the persisted token.
    async fn load_store(&self) -> Option<TokenSnapshot> {
        match self.store.load().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "failed to load persisted token, treating store as empty");
                None
            }
        }
    }

    async fn persist(&self, snapshot: &TokenSnapshot) -> Result<()> {
        let _writes = self.store_writes.lock().await;
        self.save(snapshot).await
    }

    /// Write through only while refresh `generation` is still the pending one.
    async fn persist_refreshed(&self, generation: u64, snapshot: &TokenSnapshot) -> Result<()> {
        let _writes = self.store_writes.lock().await;
        if !self.is_pending(generation) {
            debug!(generation, "refresh superseded by logout, not persisting");
            return Ok(());
        }
        self.save(snapshot).await
    }

    fn is_pending(&self, generation: u64) -> bool {
        self.state.lock().pending.as_ref().is_some_and(|p| p.generation == generation)
    }

    async fn save(&self, snapshot: &TokenSnapshot) -> Result<()> {
        self.store.save(snapshot).await.map_err(|err| {
            error!(error = %err, "failed to persist token snapshot");
            err
        })
    }

    /// Clear the pending slot and commit the outcome, unless a logout has
    /// superseded this refresh.
    fn complete(&self, generation: u64, outcome: &Result<TokenSnapshot>) {
        let committed = {
            let mut state = self.state.lock();
            let current = state.pending.as_ref().is_some_and(|p| p.generation == generation);
            if current {
                state.pending = None;
                if let Ok(snapshot) = outcome {
                    state.cached = Some(snapshot.clone());
                }
            }
            current
        };
        if committed {
            if let Ok(snapshot) = outcome {
                self.publish(Some(snapshot.clone()));
            }
        }
    }
}

/// Background refresh task; aborted on drop
#[derive(Debug)]
pub struct AutoRefreshHandle {
    task: JoinHandle<()>,
}

impl AutoRefreshHandle {
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
