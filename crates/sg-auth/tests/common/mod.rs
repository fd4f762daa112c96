#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sg_auth::{MemoryCredentialStore, Session, SessionConfig, SessionEvent, Tokens};
use tokio::sync::broadcast;
use wiremock::MockServer;

/// Unsigned JWT-shaped token expiring `secs` from now
pub fn jwt_expiring_in(secs: i64) -> String {
    jwt_with_subject(secs, "ana")
}

pub fn jwt_with_subject(secs: i64, subject: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(
            r#"{{"token_type":"access","exp":{exp},"sub":"{subject}"}}"#
        ))
    )
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn config_for(server: &MockServer) -> SessionConfig {
    SessionConfig::parse(&format!("{}/api/", server.uri())).unwrap()
}

/// Session against `server`, optionally resuming `tokens`
pub async fn session_with(server: &MockServer, tokens: Option<Tokens>) -> Session {
    let backend = match tokens {
        Some(tokens) => MemoryCredentialStore::with_tokens(tokens),
        None => MemoryCredentialStore::new(),
    };
    Session::restore(config_for(server), Arc::new(backend))
        .await
        .unwrap()
}

/// Wait for the next `LoggedOut` event, skipping anything else
pub async fn next_logout(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if matches!(event, SessionEvent::LoggedOut { .. }) {
                return event;
            }
        }
    })
    .await
    .expect("no logout event")
}
