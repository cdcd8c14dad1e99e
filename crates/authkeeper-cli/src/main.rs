//! authkeeper - command-line front end for the session store.
//!
//! Useful for poking at an authority by hand. Sessions only survive between
//! invocations when a persistent storage backend (`file` or `keyring`) is
//! configured.

use std::io;

use anyhow::{bail, Result};
use authkeeper_core::config::Config;
use authkeeper_core::{Credential, Session, SessionStore};
use chrono::Local;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: authkeeper <command>

Commands:
  login-url            Print the URL that starts the external login flow
  sign-in <id_token>   Exchange an ID token for a session and store it
  status               Restore the stored session (renewing if needed) and show it
  logout               End the session at the authority and clear it locally
  clear                Clear the local session without contacting the authority
  help                 Show this message

Environment:
  PUBLIC_API_URL               Authority base address
  AUTHKEEPER_CREDENTIAL_MODE   token | cookie
  AUTHKEEPER_STORAGE           memory | file | keyring
  AUTHKEEPER_HOST_CONTEXT      interactive | headless
  AUTHKEEPER_PASSPHRASE        Seal the session file (file storage)
  RUST_LOG                     Log filter (default: warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    info!(
        api_base_url = %config.api_base_url,
        mode = ?config.credential_mode,
        storage = ?config.storage,
        "authkeeper starting"
    );
    let store = SessionStore::from_config(&config)?;

    match command {
        "login-url" => {
            let redirect = store.begin_external_login().await?;
            println!("{}", redirect.authorization_url);
        }
        "sign-in" => {
            let Some(id_token) = args.get(2) else {
                bail!("sign-in needs an ID token\n\n{}", USAGE);
            };
            store.sign_in_with_id_token(id_token).await?;
            print_session(store.current().as_ref());
        }
        "status" => {
            store.load_session().await;
            print_session(store.current().as_ref());
        }
        "logout" => {
            store.logout().await;
            println!("Logged out");
        }
        "clear" => {
            store.clear_session();
            println!("Local session cleared");
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }

    Ok(())
}

fn print_session(session: Option<&Session>) {
    let Some(session) = session else {
        println!("Not signed in");
        return;
    };

    match session.user() {
        Some(user) => println!("Signed in as {} ({})", user.display_name(), user.id),
        None => println!("Signed in (user profile unavailable)"),
    }

    match &session.credential {
        Credential::Cookie => println!("Credential: authority cookie"),
        Credential::Token(bundle) => {
            let expires = bundle
                .expires_at_utc()
                .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| bundle.expires_at.to_string());
            println!(
                "Credential: token, expires {} ({}s left)",
                expires,
                bundle.seconds_until_expiry()
            );
        }
    }
}
