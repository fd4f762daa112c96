mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Log in to a token backend and make authenticated requests with automatic refresh
#[derive(Debug, Parser)]
#[command(name = "sessiongate", version, about)]
struct Cli {
    /// Backend API base URL
    #[arg(long, env = "SESSIONGATE_API_BASE", global = true)]
    api_base: Option<Url>,

    /// Path to config.toml
    #[arg(long, env = "SESSIONGATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exchange username and password for a session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "SESSIONGATE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the current session
    Logout,
    /// Show whether a session is active and when its access token expires
    Status,
    /// Print the current user's profile
    Me,
    /// GET a path under the API base and print the body
    Get { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::run(cli).await
}
