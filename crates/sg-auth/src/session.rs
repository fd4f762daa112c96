use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::{Method, Response};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument};

use crate::client::AuthClient;
use crate::config::{SessionConfig, endpoints};
use crate::coordinator::RefreshCoordinator;
use crate::errors::{Result, SessionError, body_snippet};
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::gate::{ApiRequest, RequestGate};
use crate::models::Me;
use crate::store::{CredentialStore, MemoryCredentialStore, TokenState, TokenStore};
use crate::tokens::Tokens;

/// One logical session against the backend.
///
/// Cheap to clone; clones share tokens, refresh state and the `me` cache.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    config: Arc<SessionConfig>,
    client: AuthClient,
    tokens: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
    gate: RequestGate,
    events: SessionEvents,
    me: RwLock<Option<Me>>,
    /// Bumped on login and logout so a profile fetched for an older session is never cached
    epoch: AtomicU64,
}

impl Session {
    /// Build a session, resuming whatever `backend` has persisted
    pub async fn restore(config: SessionConfig, backend: Arc<dyn CredentialStore>) -> Result<Self> {
        let config = Arc::new(config);
        let client = AuthClient::new(&config)?;
        let tokens = TokenStore::restore(backend).await;
        let events = SessionEvents::new(&config.login_route);
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::new(client.clone()),
            tokens.clone(),
            events.clone(),
            config.leeway_secs(),
        ));
        let gate = RequestGate::new(
            client.http().clone(),
            config.clone(),
            tokens.clone(),
            coordinator.clone(),
            events.clone(),
        );

        info!(
            api_base = %config.api_base,
            authenticated = tokens.get().is_some(),
            "Session ready"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                client,
                tokens,
                coordinator,
                gate,
                events,
                me: RwLock::new(None),
                epoch: AtomicU64::new(0),
            }),
        })
    }

    /// Session that keeps its credentials in memory only
    pub async fn in_memory(config: SessionConfig) -> Result<Self> {
        Self::restore(config, Arc::new(MemoryCredentialStore::new())).await
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// The interceptor, for callers that want to hold on to it directly
    pub fn gate(&self) -> &RequestGate {
        &self.inner.gate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Current access token snapshot
    pub fn access_token(&self) -> Option<String> {
        self.inner.tokens.get().map(|t| t.access().to_string())
    }

    /// Observe credential changes
    pub fn watch_tokens(&self) -> watch::Receiver<TokenState> {
        self.inner.tokens.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tokens.get().is_some()
    }

    /// Recomputed against the clock on every call
    pub fn is_access_token_valid(&self) -> bool {
        self.inner
            .tokens
            .valid_access(self.inner.config.leeway_secs())
            .is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_refreshing()
    }

    /// Exchange credentials for a token pair and start a session with it
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Tokens> {
        let tokens = self.inner.client.login(username, password).await?;

        // Anything still in flight belongs to the previous session
        self.reset_me();
        self.inner.coordinator.reset(Some(tokens.clone()));

        if let Err(e) = self.inner.tokens.flush().await {
            error!("Failed to persist new session: {}", e);
            self.inner.gate.end_session(LogoutReason::StorageFailure).await;
            return Err(e);
        }

        info!("Logged in");
        self.inner.events.emit(SessionEvent::LoggedIn);
        Ok(tokens)
    }

    /// End the session: wipe credentials, drop the cached profile, fail any
    /// request still waiting on a refresh and announce the redirect.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.reset_me();
        self.inner.gate.end_session(LogoutReason::UserRequested).await;
    }

    /// Build a request for `path` relative to the API base
    pub fn request(&self, method: Method, path: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::new(method, self.inner.config.endpoint(path)?))
    }

    /// Send any request through the interceptor
    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        self.inner.gate.send(request).await
    }

    /// Fetch the current user's profile and cache it
    #[instrument(skip(self))]
    pub async fn load_me(&self) -> Result<Me> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let response = self.send(self.request(Method::GET, endpoints::ME)?).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Http {
                status,
                body_snippet: body_snippet(&body),
            });
        }

        let me: Me = response.json().await?;
        if self.inner.epoch.load(Ordering::SeqCst) == epoch {
            *self.inner.me.write().unwrap_or_else(PoisonError::into_inner) = Some(me.clone());
        } else {
            debug!("Session changed while loading profile, not caching it");
        }
        Ok(me)
    }

    /// Cached profile, only while a session is active
    pub fn cached_me(&self) -> Option<Me> {
        if !self.is_authenticated() {
            return None;
        }
        self.inner
            .me
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    fn reset_me(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        *self.inner.me.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
