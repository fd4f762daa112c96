use std::time::Duration;
use url::Url;

use crate::errors::Result;

/// Backend endpoints, relative to the API base
pub mod endpoints {
    /// Credential exchange (`{username, password}` -> `{access, refresh}`)
    pub const TOKEN: &str = "token/";
    /// Refresh exchange (`{refresh}` -> `{access, refresh?}`)
    pub const TOKEN_REFRESH: &str = "token/refresh/";
    /// Current user profile
    pub const ME: &str = "me/";
}

/// Access tokens expiring within this window are treated as already expired
pub const DEFAULT_EXPIRY_LEEWAY: Duration = Duration::from_secs(5);

/// Where consumers should send the user once the session ends
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend API; every request under it gets credentials
    pub api_base: Url,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,

    /// Clock-skew allowance applied to the access token expiry
    pub expiry_leeway: Duration,

    /// Unauthenticated entry point announced when the session ends
    pub login_route: String,
}

impl SessionConfig {
    /// Create config for the given API base.
    ///
    /// The base path is normalized to end with `/` so endpoint joins stay
    /// underneath it.
    pub fn new(mut api_base: Url) -> Self {
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        Self {
            api_base,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(concat!("sessiongate/", env!("CARGO_PKG_VERSION")).to_string()),
            expiry_leeway: DEFAULT_EXPIRY_LEEWAY,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
        }
    }

    /// Parse the API base and create config for it
    pub fn parse(api_base: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(api_base)?))
    }

    pub fn with_timeouts(mut self, http_timeouts: HttpTimeouts) -> Self {
        self.http_timeouts = http_timeouts;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    /// Resolve an endpoint (or any relative path) against the API base
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.api_base.join(path.trim_start_matches('/'))?)
    }

    /// Whether `url` belongs to this session's backend (same origin, under the base path)
    pub fn is_own_backend(&self, url: &Url) -> bool {
        url.origin() == self.api_base.origin() && url.path().starts_with(self.api_base.path())
    }

    /// Whether `url` is one of the credential exchange endpoints
    pub fn is_token_endpoint(&self, url: &Url) -> bool {
        if !self.is_own_backend(url) {
            return false;
        }
        let token_root = format!("{}{}", self.api_base.path(), endpoints::TOKEN);
        url.path().starts_with(&token_root)
    }

    pub(crate) fn leeway_secs(&self) -> i64 {
        i64::try_from(self.expiry_leeway.as_secs()).unwrap_or(i64::MAX)
    }
}
