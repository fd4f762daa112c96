//! Client-side session layer for access/refresh token backends
//!
//! This crate sits between an application and a backend that issues short-lived
//! access tokens plus a longer-lived refresh token. It attaches credentials to
//! outgoing requests, notices when they expire and renews them without the
//! application having to care.
//!
//! # Request Flow
//!
//! Every request sent through a [`Session`] (or its [`RequestGate`]) goes
//! through these steps:
//!
//! 1. Requests to other origins are sent untouched
//! 2. A valid access token is attached as `Authorization: Bearer ...`
//! 3. An expired access token is refreshed before sending
//! 4. A `401` from the backend triggers a refresh and exactly one replay
//!
//! However many requests hit an expired token at once, only one refresh
//! exchange reaches the backend; the others wait for its outcome. If the
//! refresh fails, every waiting request fails and the session ends.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqwest::Method;
//! use sg_auth::{FileCredentialStore, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::parse("https://files.example.com/api/")?;
//!     let store = FileCredentialStore::new(FileCredentialStore::default_storage_dir()?).await?;
//!     let session = Session::restore(config, Arc::new(store)).await?;
//!
//!     if !session.is_authenticated() {
//!         session.login("ana", "correct horse battery staple").await?;
//!     }
//!
//!     let me = session.load_me().await?;
//!     println!("Logged in as: {:?}", me.username);
//!
//!     // Any request under the API base gets credentials and refresh handling
//!     let response = session.send(session.request(Method::GET, "projects/")?).await?;
//!     println!("{}", response.status());
//!
//!     session.logout().await;
//!     Ok(())
//! }
//! ```
//!
//! # Token Storage
//!
//! Credentials are persisted through the [`CredentialStore`] trait, so a
//! restarted client resumes its session:
//!
//! ```
//! use std::sync::Arc;
//! use sg_auth::{MemoryCredentialStore, TokenStore, Tokens};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = MemoryCredentialStore::new();
//!
//! let store = TokenStore::restore(Arc::new(backend.clone())).await;
//! store.set(Tokens::new("access", "refresh")).await?;
//!
//! // A second store over the same backend sees the saved pair
//! let reloaded = TokenStore::restore(Arc::new(backend)).await;
//! assert_eq!(reloaded.get().map(|t| t.refresh().to_string()), Some("refresh".to_string()));
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! [`FileCredentialStore`] keeps the pair in a `session.json` file under the
//! platform config directory, readable only by the current user.
//!
//! # Important Notes
//!
//! - Access tokens are decoded, never verified; the backend owns signatures
//! - Tokens expiring within 5 seconds count as expired
//! - Tokens are never logged and are wiped from memory on drop

pub mod claims;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod file_store;
pub mod gate;
pub mod guard;
pub mod models;
pub mod session;
pub mod store;
pub mod tokens;

// Re-export main types
pub use claims::{SessionClaims, decode_expiry};
pub use client::AuthClient;
pub use config::{HttpTimeouts, SessionConfig};
pub use coordinator::{RefreshCoordinator, RefreshExchange};
pub use errors::{RefreshFailure, Result, SessionError};
pub use events::{LogoutReason, SessionEvent, SessionEvents};
pub use file_store::FileCredentialStore;
pub use gate::{ApiRequest, RequestGate};
pub use guard::Access;
pub use models::{Me, MeProfile};
pub use session::Session;
pub use store::{CredentialStore, MemoryCredentialStore, TokenState, TokenStore};
pub use tokens::{Tokens, is_valid_at};
