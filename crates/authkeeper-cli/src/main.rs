//! authkeeper - command-line front end for the session layer.
//!
//! Plays the part a UI would: reads session state and calls the auth
//! operations. Credentials persist between runs in the configured backend.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authkeeper_core::api::RegistrationData;
use authkeeper_core::{
    AuthClient, BootstrapOutcome, Config, CredentialKind, ExternalSession, SocialProfile,
};

/// Log file prefix in the cache directory (rotated daily)
const LOG_FILE_PREFIX: &str = "authkeeper.log";

const USAGE: &str = "\
Usage: authkeeper <command>

Commands:
  status                          Show the stored session without contacting the server
  whoami                          Load the current user (refreshing if needed)
  login [email]                   Sign in; prompts for the password
  register <email> [name]         Create an account; prompts for the password
  activate <code>                 Activate an account (token from AUTHKEEPER_ACTIVATION_TOKEN)
  social <email> <name> [avatar]  Sign in with an externally verified identity
  logout                          Sign out here and on the server";

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    let log_dir = config.cache_dir().ok();
    let _guard = init_tracing(log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let credentials = config.open_credentials()?;
    let client = AuthClient::new(&config, credentials)?;

    match command.as_str() {
        "status" => print_status(&client),
        "whoami" => {
            match client.bootstrap(&ExternalSession::Unknown).await? {
                BootstrapOutcome::Restored(user) | BootstrapOutcome::SocialSignIn(user) => {
                    println!("Signed in as {} <{}> ({})", user.name, user.email, user.id);
                }
                BootstrapOutcome::SignedOut | BootstrapOutcome::Anonymous => {
                    println!("Not signed in");
                }
            }
        }
        "login" => {
            let email = match args.get(1) {
                Some(email) => email.clone(),
                None => prompt_line("Email", config.last_email.as_deref())?,
            };
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;

            let user = client.login(&email, &password).await?;
            println!("Login successful. Welcome, {}!", user.name);

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
        "register" => {
            let email = args.get(1).context("register needs an email")?.clone();
            let password = rpassword::prompt_password("Choose a password: ")
                .context("Failed to read password")?;
            let data = RegistrationData {
                name: args.get(2).cloned(),
                email,
                password,
            };

            let response = client.register(&data).await?;
            println!("{}", response.message);
            // The activation token only lives in memory; the next run gets it from the env.
            println!("Activation token: {}", response.activation_token);
            println!("Run `AUTHKEEPER_ACTIVATION_TOKEN=<token> authkeeper activate <code>` with the emailed code.");
        }
        "activate" => {
            let code = args.get(1).context("activate needs the emailed code")?;
            let token = std::env::var("AUTHKEEPER_ACTIVATION_TOKEN")
                .context("Set AUTHKEEPER_ACTIVATION_TOKEN to the token printed by register")?;
            client.session().set_activation_token(&token);

            let response = client.activate(code).await?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Account activated. You can now log in.".to_string())
            );
        }
        "social" => {
            let (Some(email), Some(name)) = (args.get(1), args.get(2)) else {
                anyhow::bail!("social needs an email and a name");
            };
            let profile = SocialProfile {
                email: email.clone(),
                name: name.clone(),
                avatar: args.get(3).cloned(),
            };

            let external = ExternalSession::Present(profile);
            match client.reconcile(&external).await? {
                Some(BootstrapOutcome::SocialSignIn(user)) => {
                    println!("Login successfully! Welcome, {}!", user.name);
                }
                _ => println!("Already signed in"),
            }
        }
        "logout" => {
            client.logout().await?;
            println!("Signed out");
        }
        other => {
            eprintln!("Unknown command: {}\n", other);
            println!("{}", USAGE);
        }
    }

    info!(command = %command, "Command finished");
    Ok(())
}

fn print_status(client: &AuthClient) {
    let credentials = client.credentials();

    // Only the stored credentials are known until `whoami` asks the server.
    let status = serde_json::json!({
        "hasAccessToken": credentials.get(CredentialKind::Access).is_some(),
        "hasRefreshToken": credentials.get(CredentialKind::Refresh).is_some(),
        "policy": credentials.policy(),
    });
    match serde_json::to_string_pretty(&status) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render status: {}", e),
    }
}

fn prompt_line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(value) => print!("{} [{}]: ", label, value),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim();

    match (line.is_empty(), default) {
        (true, Some(value)) => Ok(value.to_string()),
        (true, None) => anyhow::bail!("{} is required", label),
        (false, _) => Ok(line.to_string()),
    }
}
