use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, watch};
use tracing::{debug, error};

use crate::errors::{Result, SessionError};
use crate::tokens::Tokens;

/// Durable storage for the session's credential pair
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the persisted pair, `None` when no session is stored
    async fn load(&self) -> Result<Option<Tokens>>;

    /// Persist the pair, replacing whatever was stored
    async fn save(&self, tokens: &Tokens) -> Result<()>;

    /// Persist the absence of a session
    async fn clear(&self) -> Result<()>;
}

/// In-memory credential store for testing and simple use cases.
///
/// Clones share the same slot, so a second [`TokenStore`] restored from a
/// clone observes what the first one persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    slot: Arc<RwLock<Option<Tokens>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `tokens`, as if a previous run had saved them
    pub fn with_tokens(tokens: Tokens) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(tokens))),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Tokens>> {
        Ok(self
            .slot
            .read()
            .map_err(|_| SessionError::Storage("Lock poisoned".to_string()))?
            .clone())
    }

    async fn save(&self, tokens: &Tokens) -> Result<()> {
        *self
            .slot
            .write()
            .map_err(|_| SessionError::Storage("Lock poisoned".to_string()))? = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self
            .slot
            .write()
            .map_err(|_| SessionError::Storage("Lock poisoned".to_string()))? = None;
        Ok(())
    }
}

/// Snapshot of the current credentials.
///
/// `revision` increases on every replace or clear, letting callers tell
/// whether the pair changed since they last looked.
#[derive(Debug, Clone, Default)]
pub struct TokenState {
    pub tokens: Option<Tokens>,
    pub revision: u64,
}

/// Sole owner of the session's credentials.
///
/// Reads never block on I/O; writes update the in-memory snapshot atomically
/// and then persist it through the configured [`CredentialStore`].
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

struct TokenStoreInner {
    state: watch::Sender<TokenState>,
    backend: Arc<dyn CredentialStore>,
    /// Serializes backend writes so the last snapshot always wins
    flush_lock: Mutex<()>,
}

impl TokenStore {
    /// Resume whatever session the backend holds.
    ///
    /// An unreadable backend starts the store logged out.
    pub async fn restore(backend: Arc<dyn CredentialStore>) -> Self {
        let tokens = match backend.load().await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to restore persisted session: {}", e);
                None
            }
        };
        debug!(restored = tokens.is_some(), "Token store initialized");

        Self {
            inner: Arc::new(TokenStoreInner {
                state: watch::Sender::new(TokenState { tokens, revision: 0 }),
                backend,
                flush_lock: Mutex::new(()),
            }),
        }
    }

    /// Current pair, if any
    pub fn get(&self) -> Option<Tokens> {
        self.inner.state.borrow().tokens.clone()
    }

    /// Current pair together with its revision
    pub fn state(&self) -> TokenState {
        self.inner.state.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.inner.state.borrow().revision
    }

    /// Observe every credential change
    pub fn subscribe(&self) -> watch::Receiver<TokenState> {
        self.inner.state.subscribe()
    }

    /// Current access token when it is still valid under `leeway_secs`
    pub fn valid_access(&self, leeway_secs: i64) -> Option<String> {
        let state = self.inner.state.borrow();
        state
            .tokens
            .as_ref()
            .filter(|t| t.is_access_valid(leeway_secs))
            .map(|t| t.access().to_string())
    }

    /// Replace the pair and persist it
    pub async fn set(&self, tokens: Tokens) -> Result<()> {
        self.replace(Some(tokens));
        self.flush().await
    }

    /// Wipe the pair and persist its absence
    pub async fn clear(&self) -> Result<()> {
        self.replace(None);
        self.flush().await
    }

    /// Swap the in-memory snapshot without touching the backend; returns the new revision
    pub(crate) fn replace(&self, tokens: Option<Tokens>) -> u64 {
        let mut revision = 0;
        self.inner.state.send_modify(|state| {
            state.tokens = tokens;
            state.revision += 1;
            revision = state.revision;
        });
        revision
    }

    /// Write the latest snapshot to the backend
    pub(crate) async fn flush(&self) -> Result<()> {
        let _guard = self.inner.flush_lock.lock().await;
        match self.get() {
            Some(tokens) => self.inner.backend.save(&tokens).await,
            None => self.inner.backend.clear().await,
        }
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("TokenStore")
            .field("authenticated", &state.tokens.is_some())
            .field("revision", &state.revision)
            .finish()
    }
}
