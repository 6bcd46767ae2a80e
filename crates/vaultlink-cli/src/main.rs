//! vaultlink - unlock the secret vault and call the control-plane API
//! from a terminal.
//!
//! Usage:
//!   vaultlink status
//!   vaultlink unlock
//!   vaultlink logout
//!   vaultlink health
//!   vaultlink request <METHOD> <PATH> [JSON_BODY]

mod app;
mod prompt;

use std::io;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vaultlink_core::api::{Connectivity, Method, ResponseBody};
use vaultlink_core::{Config, ExecuteOptions, UnlockOutcome, VaultState};

use app::App;
use prompt::TerminalPrompt;

const USAGE: &str = "Usage: vaultlink <status|unlock|logout|health|request <METHOD> <PATH> [JSON_BODY]>";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines on drop.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    let app = App::new(config)?;
    info!(command = %command, "vaultlink starting");

    match command.as_str() {
        "status" => status(&app).await,
        "unlock" => unlock(&app).await,
        "logout" => {
            app.session.clear();
            println!("Session cleared");
            Ok(())
        }
        "health" => health(&app).await,
        "request" => request(&app, &args[1..]).await,
        other => bail!("Unknown command '{}'\n{}", other, USAGE),
    }
}

async fn status(app: &App) -> Result<()> {
    let state = app.coordinator.reconcile_on_startup().await;
    println!("Vault: {}", state);
    if let Some(status) = app.coordinator.status() {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    if let Some(expires_at) = app.session.state().expires_at() {
        println!("Session expires: {}", expires_at.to_rfc3339());
    }
    Ok(())
}

async fn unlock(app: &App) -> Result<()> {
    let state = app.coordinator.reconcile_on_startup().await;
    match state {
        VaultState::Unlocked => {
            println!("Vault already unlocked");
            return Ok(());
        }
        VaultState::Unavailable => bail!("No vault is available on this backend"),
        VaultState::Locked | VaultState::Checking => {}
    }

    let poller = app
        .config
        .status_poll_interval()
        .map(|every| app.coordinator.spawn_polling(every));

    let outcome = app.unlock_flow().run(&mut TerminalPrompt).await;
    if let Some(poller) = poller {
        poller.abort();
    }

    match outcome {
        UnlockOutcome::Unlocked(session) => {
            println!("Vault unlocked (session expires {})", session.expires_at.to_rfc3339());
        }
        _ => println!("Unlock skipped"),
    }
    Ok(())
}

async fn health(app: &App) -> Result<()> {
    match app.health_monitor().check().await {
        Connectivity::Online => println!("✓ {} is reachable", app.config.base_url),
        Connectivity::Offline => bail!("{} is unreachable", app.config.base_url),
    }
    Ok(())
}

async fn request(app: &App, args: &[String]) -> Result<()> {
    let (method, path) = match args {
        [method, path, ..] => (method, path),
        _ => bail!("{}", USAGE),
    };
    let method = Method::parse(method).with_context(|| format!("Unknown method '{}'", method))?;

    let mut options = ExecuteOptions::get().method(method);
    if let Some(raw) = args.get(2) {
        let body = serde_json::from_str(raw).context("Request body is not valid JSON")?;
        options = options.body(body);
    }

    // a restored token only goes out once the backend confirms it
    app.coordinator.reconcile_on_startup().await;
    let response = app.executor.execute(path, options).await?;
    eprintln!("HTTP {}", response.status);
    match response.body {
        ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        ResponseBody::Text(text) => println!("{}", text),
        ResponseBody::Empty => {}
    }
    Ok(())
}
