use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

const EVENT_CAPACITY: usize = 64;

/// Session state changes observable by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    TokensRefreshed,
    /// The session ended; the application should navigate to `redirect_to`
    LoggedOut {
        reason: LogoutReason,
        redirect_to: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// `Session::logout` was called
    UserRequested,
    /// The backend rejected the refresh token or the exchange failed
    RefreshFailed,
    /// A request got a 401 with no way to refresh
    Unauthorized,
    /// Credentials could not be persisted
    StorageFailure,
}

/// Broadcast hub for [`SessionEvent`]s
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
    login_route: Arc<str>,
}

impl SessionEvents {
    pub fn new(login_route: &str) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sender,
            login_route: Arc::from(login_route),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn logged_out(&self, reason: LogoutReason) {
        info!(?reason, "Session ended");
        self.emit(SessionEvent::LoggedOut {
            reason,
            redirect_to: self.login_route.to_string(),
        });
    }
}
