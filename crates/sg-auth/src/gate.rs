//! Per-request credential handling.
//!
//! Every outbound request passes through [`RequestGate::send`]:
//!
//! 1. Requests outside the API base go out untouched.
//! 2. A valid access token is attached as a bearer credential.
//! 3. An expired token is refreshed *before* sending (proactive path).
//! 4. A 401 from the backend triggers one refresh and a single replay
//!    (reactive path).
//!
//! Requests are immutable [`ApiRequest`] descriptions, so a replay is a plain
//! re-issue with a different `Authorization` header.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::errors::{Result, SessionError, body_snippet};
use crate::events::{LogoutReason, SessionEvents};
use crate::store::TokenStore;

/// Immutable description of an outbound request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(value)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// The interceptor sitting between the application and the backend
#[derive(Debug, Clone)]
pub struct RequestGate {
    http: Client,
    config: Arc<SessionConfig>,
    tokens: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
    events: SessionEvents,
}

impl RequestGate {
    pub fn new(
        http: Client,
        config: Arc<SessionConfig>,
        tokens: TokenStore,
        coordinator: Arc<RefreshCoordinator>,
        events: SessionEvents,
    ) -> Self {
        Self {
            http,
            config,
            tokens,
            coordinator,
            events,
        }
    }

    /// Send `request`, handling credentials and refresh transparently.
    ///
    /// Any status other than 401 is returned as-is. A 401 that survives the
    /// single replay is reported as [`SessionError::Unauthorized`].
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        if !self.config.is_own_backend(&request.url) {
            return self.dispatch(&request, None).await;
        }

        let exempt = self.config.is_token_endpoint(&request.url);
        let leeway = self.config.leeway_secs();
        let seen = self.tokens.state();

        let (bearer, refreshed) = match seen.tokens.as_ref() {
            Some(tokens) if tokens.is_access_valid(leeway) => (Some(tokens.access().to_string()), false),
            Some(tokens) if !exempt => {
                debug!("Access token expired, refreshing before send");
                let access = self
                    .coordinator
                    .ensure_fresh_token(tokens.refresh(), seen.revision)
                    .await?;
                (Some(access), true)
            }
            _ => (None, false),
        };

        let response = self.dispatch(&request, bearer.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if refreshed {
            warn!("Backend rejected a freshly refreshed token");
            return Err(unauthorized(response).await);
        }

        let current = self.tokens.state();
        let refresh = match current.tokens.as_ref() {
            Some(tokens) if !exempt => tokens.refresh().to_string(),
            _ => {
                let err = unauthorized(response).await;
                // Someone else already ended the session since we looked
                let ended_elsewhere = seen.tokens.is_some() && current.tokens.is_none();
                if !ended_elsewhere {
                    self.end_session(LogoutReason::Unauthorized).await;
                }
                return Err(err);
            }
        };

        let original = unauthorized(response).await;
        debug!("Got 401, refreshing and replaying once");
        match self.coordinator.ensure_fresh_token(&refresh, seen.revision).await {
            Ok(access) => {
                let retried = self.dispatch(&request, Some(&access)).await?;
                if retried.status() == StatusCode::UNAUTHORIZED {
                    warn!("Replayed request still unauthorized, giving up");
                    return Err(unauthorized(retried).await);
                }
                Ok(retried)
            }
            Err(failure) => {
                debug!(%failure, "Refresh failed, propagating original 401");
                Err(original)
            }
        }
    }

    /// Wipe credentials, release refresh waiters and announce the logout
    pub(crate) async fn end_session(&self, reason: LogoutReason) {
        self.coordinator.reset(None);
        if let Err(e) = self.tokens.flush().await {
            error!("Failed to persist session end: {}", e);
        }
        self.events.logged_out(reason);
    }

    async fn dispatch(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<Response> {
        let mut headers = request.headers.clone();
        if let Some(token) = bearer {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                SessionError::InvalidResponse("Access token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        Ok(builder.send().await?)
    }
}

async fn unauthorized(response: Response) -> SessionError {
    let body = response.text().await.unwrap_or_default();
    SessionError::Unauthorized {
        body_snippet: body_snippet(&body),
    }
}
