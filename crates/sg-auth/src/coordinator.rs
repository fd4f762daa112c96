//! Single-flight refresh of the access token.
//!
//! However many requests discover an expired token at once, exactly one
//! refresh exchange goes to the backend. The first caller leads the cycle;
//! everyone else parks a [`oneshot`] continuation on the pending list and gets
//! the leader's outcome when it lands.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{RefreshFailure, Result};
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::models::RefreshResponse;
use crate::store::TokenStore;
use crate::tokens::Tokens;

/// Backend call that trades a refresh token for new credentials
#[async_trait::async_trait]
pub trait RefreshExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshResponse>;
}

type RefreshOutcome = std::result::Result<String, RefreshFailure>;
type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    Idle,
    Refreshing { cycle: u64, waiters: Vec<Waiter> },
}

struct CoordinatorState {
    refresh: RefreshState,
    cycles: u64,
}

impl CoordinatorState {
    /// Close `cycle` if it is still the one in flight, handing back its waiters
    fn finish(&mut self, cycle: u64) -> Option<Vec<Waiter>> {
        match &mut self.refresh {
            RefreshState::Refreshing { cycle: current, waiters } if *current == cycle => {
                let waiters = std::mem::take(waiters);
                self.refresh = RefreshState::Idle;
                Some(waiters)
            }
            _ => None,
        }
    }
}

enum Role {
    Leader(u64),
    Follower(oneshot::Receiver<RefreshOutcome>),
    Fresh(String),
    Ended,
}

/// Owner of the session's `RefreshState`
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
    exchange: Arc<dyn RefreshExchange>,
    tokens: TokenStore,
    events: SessionEvents,
    leeway_secs: i64,
}

impl RefreshCoordinator {
    pub fn new(
        exchange: Arc<dyn RefreshExchange>,
        tokens: TokenStore,
        events: SessionEvents,
        leeway_secs: i64,
    ) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                refresh: RefreshState::Idle,
                cycles: 0,
            }),
            exchange,
            tokens,
            events,
            leeway_secs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock().refresh, RefreshState::Refreshing { .. })
    }

    /// Callers parked behind the cycle in flight
    pub fn pending_waiters(&self) -> usize {
        match &self.lock().refresh {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Obtain an access token that replaces the one the caller saw expire.
    ///
    /// `seen_revision` is the [`TokenStore`] revision the caller read its
    /// credentials at. If the store has since moved to a valid token, that
    /// token is returned without another exchange.
    #[instrument(skip(self, refresh_token))]
    pub async fn ensure_fresh_token(&self, refresh_token: &str, seen_revision: u64) -> RefreshOutcome {
        let role = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match &mut state.refresh {
                RefreshState::Refreshing { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "Joining refresh in flight");
                    Role::Follower(rx)
                }
                RefreshState::Idle => match self.renewed_since(seen_revision) {
                    Some(role) => role,
                    None => {
                        state.cycles += 1;
                        state.refresh = RefreshState::Refreshing {
                            cycle: state.cycles,
                            waiters: Vec::new(),
                        };
                        Role::Leader(state.cycles)
                    }
                },
            }
        };

        let cycle = match role {
            Role::Fresh(access) => return Ok(access),
            Role::Ended => return Err(RefreshFailure::SessionEnded),
            Role::Follower(rx) => return rx.await.unwrap_or(Err(RefreshFailure::Abandoned)),
            Role::Leader(cycle) => cycle,
        };

        debug!(cycle, "Starting refresh exchange");
        let mut in_flight = CycleGuard {
            coordinator: self,
            cycle,
            armed: true,
        };
        let outcome = self.exchange.exchange(refresh_token).await;
        in_flight.armed = false;

        match outcome {
            Ok(response) => self.complete(cycle, refresh_token, response).await,
            Err(e) => self.fail(cycle, RefreshFailure::from(&e)).await,
        }
    }

    /// Release every waiter with `SessionEnded` and forget the cycle in flight.
    ///
    /// The exchange result, when it arrives, is discarded.
    pub fn abort(&self) -> usize {
        let waiters = forget_cycle(&mut self.lock());
        release(waiters)
    }

    /// Swap the credentials and forget the cycle in flight in one critical section.
    ///
    /// A refresh landing afterwards finds its cycle gone, so it can neither
    /// revive a logged-out session nor overwrite a new login. The caller
    /// persists the new snapshot.
    pub(crate) fn reset(&self, tokens: Option<Tokens>) -> usize {
        let waiters = {
            let mut state = self.lock();
            self.tokens.replace(tokens);
            forget_cycle(&mut state)
        };
        release(waiters)
    }

    /// Decide whether the store changed under the caller since it read `seen_revision`.
    ///
    /// A store that has been cleared means the session is over and no
    /// exchange may start.
    fn renewed_since(&self, seen_revision: u64) -> Option<Role> {
        let current = self.tokens.state();
        let Some(tokens) = current.tokens.as_ref() else {
            return Some(Role::Ended);
        };
        if current.revision == seen_revision {
            return None;
        }
        if tokens.is_access_valid(self.leeway_secs) {
            return Some(Role::Fresh(tokens.access().to_string()));
        }
        None
    }

    async fn complete(&self, cycle: u64, refresh_token: &str, response: RefreshResponse) -> RefreshOutcome {
        let access = response.access;
        let refresh = response.refresh.unwrap_or_else(|| refresh_token.to_string());

        let waiters = {
            let mut state = self.lock();
            let Some(waiters) = state.finish(cycle) else {
                debug!(cycle, "Session ended during refresh, discarding new tokens");
                return Err(RefreshFailure::SessionEnded);
            };
            self.tokens.replace(Some(Tokens::new(access.clone(), refresh)));
            waiters
        };

        if let Err(e) = self.tokens.flush().await {
            error!("Failed to persist refreshed tokens: {}", e);
            let failure = RefreshFailure::Storage(e.to_string());
            self.end_session(LogoutReason::StorageFailure).await;
            notify(waiters, &Err(failure.clone()));
            return Err(failure);
        }

        info!(cycle, waiters = waiters.len(), "Access token refreshed");
        self.events.emit(SessionEvent::TokensRefreshed);
        let outcome = Ok(access);
        notify(waiters, &outcome);
        outcome
    }

    async fn fail(&self, cycle: u64, failure: RefreshFailure) -> RefreshOutcome {
        let waiters = {
            let mut state = self.lock();
            let Some(waiters) = state.finish(cycle) else {
                return Err(RefreshFailure::SessionEnded);
            };
            self.tokens.replace(None);
            waiters
        };

        warn!(cycle, waiters = waiters.len(), %failure, "Refresh failed, ending session");
        if let Err(e) = self.tokens.flush().await {
            error!("Failed to persist session end: {}", e);
        }
        self.events.logged_out(LogoutReason::RefreshFailed);
        notify(waiters, &Err(failure.clone()));
        Err(failure)
    }

    async fn end_session(&self, reason: LogoutReason) {
        self.reset(None);
        if let Err(e) = self.tokens.flush().await {
            error!("Failed to clear credentials: {}", e);
        }
        self.events.logged_out(reason);
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("pending_waiters", &self.pending_waiters())
            .finish()
    }
}

/// Returns the coordinator to `Idle` if the leading future is dropped mid-exchange
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    cycle: u64,
    armed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = self.coordinator.lock().finish(self.cycle);
        if let Some(waiters) = waiters {
            warn!(cycle = self.cycle, "Refresh abandoned by its caller");
            notify(waiters, &Err(RefreshFailure::Abandoned));
        }
    }
}

fn forget_cycle(state: &mut CoordinatorState) -> Vec<Waiter> {
    match std::mem::replace(&mut state.refresh, RefreshState::Idle) {
        RefreshState::Refreshing { waiters, .. } => waiters,
        RefreshState::Idle => Vec::new(),
    }
}

fn release(waiters: Vec<Waiter>) -> usize {
    let released = waiters.len();
    if released > 0 {
        debug!(released, "Releasing refresh waiters");
    }
    notify(waiters, &Err(RefreshFailure::SessionEnded));
    released
}

fn notify(waiters: Vec<Waiter>, outcome: &RefreshOutcome) {
    for waiter in waiters {
        // A waiter whose request was dropped no longer cares
        let _ = waiter.send(outcome.clone());
    }
}
