//! Navigation guards for screens that need a session (or an admin one).

use tracing::debug;

use crate::session::Session;

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// Send the user to the unauthenticated entry point
    RedirectToLogin(String),
    /// Authenticated, but not allowed here
    Deny,
}

impl Session {
    /// Require an active session with a usable access token.
    ///
    /// An expired token gets one refresh attempt; if that fails the session
    /// has already ended and the user is sent to log in.
    pub async fn authorize(&self) -> Access {
        if self.tokens().valid_access(self.config().leeway_secs()).is_some() {
            return Access::Allow;
        }
        let state = self.tokens().state();
        let Some(tokens) = state.tokens.as_ref() else {
            return self.to_login();
        };

        match self
            .coordinator()
            .ensure_fresh_token(tokens.refresh(), state.revision)
            .await
        {
            Ok(_) => Access::Allow,
            Err(failure) => {
                debug!(%failure, "Guard could not renew the session");
                self.to_login()
            }
        }
    }

    /// Require a session whose user is staff or has the `admin` role
    pub async fn authorize_admin(&self) -> Access {
        match self.authorize().await {
            Access::Allow => {}
            other => return other,
        }

        let me = match self.cached_me() {
            Some(me) => me,
            None => match self.load_me().await {
                Ok(me) => me,
                Err(e) => {
                    debug!("Profile unavailable, denying admin access: {}", e);
                    return Access::Deny;
                }
            },
        };

        if me.is_admin() { Access::Allow } else { Access::Deny }
    }

    fn to_login(&self) -> Access {
        Access::RedirectToLogin(self.config().login_route.clone())
    }
}
