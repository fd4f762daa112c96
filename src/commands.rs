use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::Method;
use sg_auth::{FileCredentialStore, LogoutReason, Session, SessionClaims, SessionEvent};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::CliConfig;
use crate::{Cli, Command};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => CliConfig::default_path()?,
    };
    let config = CliConfig::load(&config_path).await?;
    let session_config = config.session_config(cli.api_base)?;

    let store = FileCredentialStore::new(config.storage_dir()?)
        .await
        .context("Failed to open session storage")?;
    let session = Session::restore(session_config, Arc::new(store))
        .await
        .context("Failed to restore session")?;
    let mut events = session.subscribe();

    let result = execute(&session, cli.command).await;
    report_logout(&mut events);
    result
}

async fn execute(session: &Session, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { username, password } => {
            session
                .login(&username, &password)
                .await
                .context("Login failed")?;
            info!("Logged in as {username}");
        }
        Command::Logout => {
            if !session.is_authenticated() {
                println!("No active session");
                return Ok(());
            }
            session.logout().await;
            info!("Logged out");
        }
        Command::Status => print_status(session),
        Command::Me => {
            let me = session.load_me().await.context("Failed to load profile")?;
            println!("{}", serde_json::to_string_pretty(&me)?);
            if me.is_admin() {
                println!("(administrator)");
            }
        }
        Command::Get { path } => {
            let request = session.request(Method::GET, &path)?;
            debug!("GET {}", request.url());
            let response = session.send(request).await?;
            let status = response.status();
            let body = response.text().await.context("Failed to read response body")?;
            if !status.is_success() {
                anyhow::bail!("HTTP {status}: {body}");
            }
            println!("{body}");
        }
    }
    Ok(())
}

fn print_status(session: &Session) {
    let Some(access) = session.access_token() else {
        println!("Not logged in");
        return;
    };

    let claims = SessionClaims::decode(&access);
    let subject = claims
        .as_ref()
        .and_then(|c| c.subject.clone())
        .unwrap_or_else(|| "unknown".to_string());
    println!("Logged in as {subject}");

    let expiry = claims
        .and_then(|c| c.expires_at)
        .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0));
    match (session.is_access_token_valid(), expiry) {
        (true, Some(at)) => println!("Access token valid until {at}"),
        (true, None) => println!("Access token valid"),
        (false, _) => println!("Access token expired; it will be renewed on the next request"),
    }
}

fn report_logout(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::LoggedOut { reason, redirect_to } = event
            && reason != LogoutReason::UserRequested
        {
            eprintln!("Session ended ({reason:?}); sign in again via `sessiongate login` ({redirect_to})");
        }
    }
}
