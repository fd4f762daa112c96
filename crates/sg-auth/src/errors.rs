use thiserror::Error;

/// Session layer error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body_snippet}")]
    Http {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Login rejected by backend ({status}): {body_snippet}")]
    LoginRejected {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Request unauthorized: {body_snippet}")]
    Unauthorized { body_snippet: String },

    #[error("Authentication failed: {0}")]
    Authentication(#[from] RefreshFailure),

    #[error("No active session")]
    NotAuthenticated,

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the credential store lock")]
    LockTimeout,

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SessionError {
    /// Whether this error means the caller no longer holds usable credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::Authentication(_) | Self::NotAuthenticated
        )
    }
}

/// Terminal outcome handed to every request waiting on a refresh cycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("refresh token rejected (HTTP {status})")]
    Rejected { status: u16 },

    #[error("refresh exchange failed: {0}")]
    Transport(String),

    #[error("refreshed credentials could not be stored: {0}")]
    Storage(String),

    #[error("session ended while the refresh was pending")]
    SessionEnded,

    #[error("refresh cycle abandoned before completion")]
    Abandoned,
}

impl From<&SessionError> for RefreshFailure {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Http { status, .. } | SessionError::LoginRejected { status, .. } => {
                Self::Rejected {
                    status: status.as_u16(),
                }
            }
            SessionError::Authentication(failure) => failure.clone(),
            SessionError::Io(_) | SessionError::Storage(_) | SessionError::LockTimeout => {
                Self::Storage(err.to_string())
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub(crate) fn body_snippet(body: &str) -> String {
    body.chars().take(200).collect()
}
