//! Session lifecycle: login, register, logout, refresh and background renewal.
//!
//! One `SessionManager` exists per process and is handed to whoever needs it
//! (it is a cheap `Arc` clone). It is the only writer of `AuthState`; every
//! mutation is followed in the same synchronous step by a save or a clear of
//! the `SessionStore`.
//!
//! Refresh is single-flight: the first caller creates a shared pending future
//! and every overlapping caller awaits that same future. Each session carries
//! an epoch that is bumped on login and logout under the state lock, so a
//! refresh that lands after its session ended is discarded instead of applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::{self, DEFAULT_EXPIRY_THRESHOLD};
use super::error::SessionError;
use super::state::{AuthState, SessionData, SessionPhase};
use super::store::{KeyValueStore, SessionStore};
use crate::api::{AuthClient, LoginRequest, RegisterRequest};

/// Default period of the background renewal check.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often the renewal task checks the access token.
    pub renew_interval: Duration,
    /// Renew once the access token has less than this left.
    pub expiry_threshold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renew_interval: DEFAULT_RENEW_INTERVAL,
            expiry_threshold: DEFAULT_EXPIRY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// `logout()` was called.
    User,
    /// The session could not be renewed.
    Expired,
}

/// Session transitions broadcast to the hosting application.
///
/// `LoggedOut { reason: Expired }` is the session-expired signal: hosts
/// subscribe to it to send the user back to a login screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: String, tenant_slug: String },
    Refreshed,
    LoggedOut { reason: LogoutReason },
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, SessionError>>>;

struct Inner {
    auth: AuthClient,
    store: SessionStore<Arc<dyn KeyValueStore>>,
    config: SessionConfig,
    state: RwLock<AuthState>,
    epoch: AtomicU64,
    /// Pending refresh tagged with the epoch that started it.
    inflight: Mutex<Option<(u64, RefreshFuture)>>,
    renewal: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Owner of the process-wide session. Clone is cheap.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(auth: AuthClient, storage: Arc<dyn KeyValueStore>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                auth,
                store: SessionStore::new(storage),
                config,
                state: RwLock::new(AuthState::default()),
                epoch: AtomicU64::new(0),
                inflight: Mutex::new(None),
                renewal: Mutex::new(None),
                events,
            }),
        }
    }

    /// Snapshot of the current session state
    pub fn state(&self) -> AuthState {
        self.inner.state.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.read().access_token().map(str::to_string)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.inner.state.read().refresh_token().is_some()
    }

    /// Receive session transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Restore the session persisted by a previous run.
    ///
    /// The stored session is trusted without a network round-trip; a stale
    /// token is renewed by the background task or by the first 401.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&self) {
        match self.inner.store.load() {
            Some(data) => {
                info!(user_id = %data.user.id, tenant = %data.tenant.slug, "Restored stored session");
                {
                    let mut state = self.inner.state.write();
                    self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                    *state = AuthState::authenticated(data);
                }
                self.inner.start_renewal();
            }
            None => {
                debug!("No stored session");
                // Drop partial or corrupt leftovers before the next save.
                if let Err(e) = self.inner.store.clear() {
                    warn!(error = %e, "Failed to clear session storage");
                }
                *self.inner.state.write() = AuthState::logged_out();
            }
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        tenant_slug: Option<&str>,
    ) -> Result<AuthState, SessionError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            client_slug: tenant_slug.map(str::to_string),
        };
        self.inner.set_phase(SessionPhase::Authenticating);
        let result = self.inner.auth.login(&request).await;
        self.inner.establish(result)
    }

    /// Create an account (and possibly a tenant) and sign in with it.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        tenant_name: Option<&str>,
        tenant_slug: Option<&str>,
    ) -> Result<AuthState, SessionError> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            client_name: tenant_name.map(str::to_string),
            client_slug: tenant_slug.map(str::to_string),
        };
        self.inner.set_phase(SessionPhase::Authenticating);
        let result = self.inner.auth.register(&request).await;
        self.inner.establish(result)
    }

    /// Clear storage and reset to logged out. No network call; idempotent.
    pub fn logout(&self) {
        self.inner.end_session(LogoutReason::User, None);
    }

    /// Obtain a new access token, sharing any refresh already in flight.
    ///
    /// Any failure other than `Superseded` or `NotAuthenticated` ends the
    /// session before this returns.
    pub async fn refresh(&self) -> Result<String, SessionError> {
        let future = self.inner.pending_refresh()?;
        future.await
    }

    /// Stop the background renewal task without touching the session.
    pub fn shutdown(&self) {
        self.inner.stop_renewal();
    }

    #[cfg(test)]
    fn renewal_running(&self) -> bool {
        self.inner
            .renewal
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Inner {
    fn set_phase(&self, phase: SessionPhase) {
        self.state.write().phase = phase;
    }

    fn settle_phase(&self) {
        settle(&mut self.state.write());
    }

    /// Apply the outcome of a login or register call.
    ///
    /// The save, the epoch bump and the state swap happen under one write
    /// lock, so a refresh landing concurrently either finishes first or sees
    /// the new epoch.
    fn establish(
        self: &Arc<Self>,
        result: Result<SessionData, SessionError>,
    ) -> Result<AuthState, SessionError> {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "Authentication failed");
                self.settle_phase();
                return Err(e);
            }
        };

        let event = SessionEvent::LoggedIn {
            user_id: data.user.id.clone(),
            tenant_slug: data.tenant.slug.clone(),
        };
        let (epoch, snapshot) = {
            let mut state = self.state.write();
            if let Err(e) = self.store.save(&data) {
                warn!(error = %e, "Failed to persist new session");
                settle(&mut state);
                return Err(SessionError::Storage(e.to_string()));
            }
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *state = AuthState::authenticated(data);
            (epoch, state.clone())
        };
        self.drop_stale_inflight(epoch);
        self.start_renewal();

        info!(?event, "Session established");
        let _ = self.events.send(event);
        Ok(snapshot)
    }

    /// End the session. With `expected_epoch`, only if that session is
    /// still the current one; returns whether anything was ended.
    fn end_session(&self, reason: LogoutReason, expected_epoch: Option<u64>) -> bool {
        let (epoch, was_authenticated) = {
            let mut state = self.state.write();
            if let Some(expected) = expected_epoch {
                if self.epoch.load(Ordering::SeqCst) != expected {
                    return false;
                }
            }
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let had_session = state.session.is_some();
            *state = AuthState::logged_out();
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear session storage");
            }
            (epoch, had_session)
        };
        self.stop_renewal();
        self.drop_stale_inflight(epoch);

        if was_authenticated {
            info!(?reason, "Session ended");
            let _ = self.events.send(SessionEvent::LoggedOut { reason });
        }
        true
    }

    /// Join the refresh in flight for the current session, or start one.
    fn pending_refresh(self: &Arc<Self>) -> Result<RefreshFuture, SessionError> {
        let mut slot = self.inflight.lock();
        let (epoch, refresh_token) = {
            let mut state = self.state.write();
            let epoch = self.epoch.load(Ordering::SeqCst);
            if let Some((started, future)) = slot.as_ref() {
                if *started == epoch {
                    debug!("Joining refresh in flight");
                    return Ok(future.clone());
                }
            }
            let token = state
                .refresh_token()
                .map(str::to_string)
                .ok_or(SessionError::NotAuthenticated)?;
            state.phase = SessionPhase::Refreshing;
            (epoch, token)
        };

        debug!(epoch, "Starting token refresh");
        let auth = self.auth.clone();
        let weak = Arc::downgrade(self);
        let future = async move {
            let outcome = auth.refresh(&refresh_token).await;
            match weak.upgrade() {
                Some(inner) => inner.finish_refresh(epoch, outcome),
                None => Err(SessionError::Superseded),
            }
        }
        .boxed()
        .shared();
        *slot = Some((epoch, future.clone()));
        Ok(future)
    }

    fn finish_refresh(
        &self,
        epoch: u64,
        outcome: Result<String, SessionError>,
    ) -> Result<String, SessionError> {
        let result = outcome.and_then(|token| self.apply_access_token(epoch, token));

        match &result {
            Ok(_) => {
                self.clear_inflight(epoch);
                debug!("Access token refreshed");
                let _ = self.events.send(SessionEvent::Refreshed);
            }
            Err(SessionError::Superseded) => {
                debug!(epoch, "Discarding refresh result for a superseded session");
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                if !self.end_session(LogoutReason::Expired, Some(epoch)) {
                    debug!(epoch, "Session already replaced, keeping it");
                    return Err(SessionError::Superseded);
                }
            }
        }
        result
    }

    /// Swap in a new access token, leaving every other field alone.
    ///
    /// The epoch is checked under the same write lock that guards the save.
    fn apply_access_token(&self, epoch: u64, token: String) -> Result<String, SessionError> {
        let mut state = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(SessionError::Superseded);
        }
        let session = state
            .session
            .as_mut()
            .ok_or(SessionError::NotAuthenticated)?;

        let mut updated = session.clone();
        updated.access_token = token.clone();
        self.store
            .save(&updated)
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        *session = updated;
        state.phase = SessionPhase::Authenticated;
        Ok(token)
    }

    fn clear_inflight(&self, epoch: u64) {
        let mut slot = self.inflight.lock();
        if matches!(slot.as_ref(), Some((started, _)) if *started == epoch) {
            *slot = None;
        }
    }

    /// Forget a pending refresh started under an earlier epoch.
    fn drop_stale_inflight(&self, current: u64) {
        let mut slot = self.inflight.lock();
        if matches!(slot.as_ref(), Some((started, _)) if *started != current) {
            *slot = None;
        }
    }

    fn start_renewal(self: &Arc<Self>) {
        self.stop_renewal();

        let weak = Arc::downgrade(self);
        let SessionConfig {
            renew_interval,
            expiry_threshold,
        } = self.config;

        let handle = tokio::spawn(renewal_loop(weak, renew_interval, expiry_threshold));
        *self.renewal.lock() = Some(handle);
    }

    fn stop_renewal(&self) {
        if let Some(handle) = self.renewal.lock().take() {
            handle.abort();
            debug!("Renewal task stopped");
        }
    }
}

fn settle(state: &mut AuthState) {
    state.phase = if state.is_authenticated() {
        SessionPhase::Authenticated
    } else {
        SessionPhase::LoggedOut
    };
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.renewal.get_mut().take() {
            handle.abort();
        }
    }
}

/// Periodically renew the access token while the session lives.
async fn renewal_loop(weak: Weak<Inner>, interval: Duration, threshold: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };

        let token = inner.state.read().access_token().map(str::to_string);
        let Some(token) = token else { break };

        if clock::is_expiring_soon(&token, threshold) {
            debug!("Access token expiring soon, renewing");
            let manager = SessionManager { inner };
            if let Err(e) = manager.refresh().await {
                debug!(error = %e, "Background refresh failed");
            }
        }
    }
}
