use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{SessionConfig, endpoints};
use crate::coordinator::RefreshExchange;
use crate::errors::{Result, SessionError, body_snippet};
use crate::models::{LoginRequest, RefreshRequest, RefreshResponse, TokenPairResponse};
use crate::tokens::Tokens;

/// HTTP client for the backend's credential endpoints
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: Client,
    token_url: Url,
    refresh_url: Url,
}

impl AuthClient {
    /// Create a new client for the backend described by `config`
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("sessiongate"))
            .build()?;

        Ok(Self {
            http,
            token_url: config.endpoint(endpoints::TOKEN)?,
            refresh_url: config.endpoint(endpoints::TOKEN_REFRESH)?,
        })
    }

    /// Underlying HTTP client, shared with the request gate
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Exchange username and password for a token pair
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Tokens> {
        debug!("Exchanging credentials for tokens");
        let response = self
            .http
            .post(self.token_url.clone())
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Credential exchange rejected");
            return Err(SessionError::LoginRejected {
                status,
                body_snippet: body_snippet(&body),
            });
        }

        let pair: TokenPairResponse = response.json().await?;
        Ok(Tokens::new(pair.access, pair.refresh))
    }

    /// Exchange a refresh token for a new access token
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        debug!("Refreshing access token");
        let response = self
            .http
            .post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Http {
                status,
                body_snippet: body_snippet(&body),
            });
        }

        let refreshed: RefreshResponse = response.json().await?;
        if refreshed.access.is_empty() {
            return Err(SessionError::InvalidResponse(
                "Refresh response carried an empty access token".to_string(),
            ));
        }
        Ok(refreshed)
    }
}

#[async_trait::async_trait]
impl RefreshExchange for AuthClient {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshResponse> {
        self.refresh(refresh_token).await
    }
}
