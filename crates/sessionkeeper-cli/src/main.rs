//! sessionkeeper - command-line front end for an authenticated API session.
//!
//! Logs in, shows who is signed in and how long the session has left,
//! renews tokens on demand and watches the countdown until expiry.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionkeeper_core::utils::{format_countdown, mask_token};
use sessionkeeper_core::{Config, CredentialStore, Keychain, LoginCredentials, Session};

const ENV_USERNAME: &str = "SESSIONKEEPER_USERNAME";
const ENV_PASSWORD: &str = "SESSIONKEEPER_PASSWORD";

const USAGE: &str = "\
Usage: sessionkeeper <command> [args]

Commands:
  login [username] [--remember]   Sign in (password from keychain, env or prompt)
  logout [--forget]               Sign out; --forget also drops the saved password
  whoami                          Fetch and show the signed-in profile
  status                          Show session state and time left
  refresh                         Renew the access token now
  watch                           Follow the countdown until the session ends
  role <slug>                     Select one of the profile's roles
  can-access <module>             Check whether a module is allowed
  forgot-password <email>         Request a password reset
  reset-password <token>          Set a new password with a reset token
  help                            Show this message";

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr, filtered by RUST_LOG (default: warn).
/// A daily rolling file in the log directory records debug and up.
fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(console_filter);

    let (file, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "sessionkeeper.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("sessionkeeper_core=debug,sessionkeeper=debug"));
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    let _log_guard = config.log_dir().ok().and_then(|dir| init_tracing(&dir));
    info!(api = %config.api_base_url, command, "sessionkeeper starting");

    let store = CredentialStore::open(config.data_dir()?).context("Failed to open session store")?;
    let session = Session::new(&config, store)?;
    let restored = session.restore().await;
    debug!(restored, "Session restore finished");

    let rest = &args[1..];
    match command {
        "login" => login(&session, &mut config, rest).await,
        "logout" => logout(&session, &config, rest).await,
        "whoami" => whoami(&session).await,
        "status" => status(&session).await,
        "refresh" => {
            session.refresh_session().await?;
            let left = expires_in(&session).await;
            println!("Session renewed ({} left).", left);
            Ok(())
        }
        "watch" => watch(&session).await,
        "role" => select_role(&session, rest).await,
        "can-access" => can_access(&session, rest).await,
        "forgot-password" => forgot_password(&session, rest).await,
        "reset-password" => reset_password(&session, rest).await,
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn login(session: &Session, config: &mut Config, args: &[String]) -> Result<()> {
    let remember = args.iter().any(|a| a == "--remember");
    let username = match args.iter().find(|a| !a.starts_with("--")) {
        Some(name) => name.clone(),
        None => match std::env::var(ENV_USERNAME).ok().or_else(|| config.last_username.clone()) {
            Some(name) => name,
            None => prompt("Username: ")?,
        },
    };

    let keychain = Keychain::new();
    let password = match std::env::var(ENV_PASSWORD).ok() {
        Some(password) => password,
        None => match keychain.recall(&username) {
            Some(password) => password,
            None => rpassword::prompt_password(format!("Password for {}: ", username))?,
        },
    };

    let profile = match session.login(&LoginCredentials::new(&username, &password)).await {
        Ok(profile) => profile,
        Err(e) => bail!("{}", e.user_message()),
    };

    if remember {
        keychain
            .remember(&username, &password)
            .context("Failed to save password to keychain")?;
    }
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        debug!(error = %e, "Could not save config");
    }

    println!("Signed in as {}.", profile.display_name());
    let left = expires_in(session).await;
    println!("Session expires in {}.", left);
    Ok(())
}

async fn logout(session: &Session, config: &Config, args: &[String]) -> Result<()> {
    session.logout().await;
    if args.iter().any(|a| a == "--forget") {
        if let Some(ref username) = config.last_username {
            Keychain::new()
                .forget(username)
                .context("Failed to remove password from keychain")?;
        }
    }
    println!("Signed out.");
    Ok(())
}

async fn whoami(session: &Session) -> Result<()> {
    require_session(session)?;
    let profile = session.refresh_user().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let selected = session.selected_role().await;

    println!("{} ({})", profile.display_name(), profile.username);
    if let Some(ref email) = profile.email {
        println!("  email:   {}", email);
    }
    for role in &profile.roles {
        let marker = if selected.as_ref().map(|r| r.slug == role.slug).unwrap_or(false) {
            "*"
        } else {
            " "
        };
        println!("  role:  {} {} ({})", marker, role.name, role.slug);
    }
    let modules = profile.module_slugs();
    if !modules.is_empty() {
        println!("  modules: {}", modules.join(", "));
    }
    Ok(())
}

async fn status(session: &Session) -> Result<()> {
    let stored = session.store().snapshot().await;
    if !session.is_authenticated() {
        println!("Not signed in.");
        if let Some(error) = session.error() {
            println!("  {}", error);
        }
        return Ok(());
    }

    let name = stored
        .user
        .as_ref()
        .map(|p| p.display_name().to_string())
        .unwrap_or_default();
    println!("Signed in as {}.", name);
    if let Some(ref token) = stored.access_token {
        println!("  access token:  {}", mask_token(token));
    }
    if let Some(ref token) = stored.refresh_token {
        println!("  refresh token: {}", mask_token(token));
    }
    if let Some(expires_at) = stored.expires_at {
        let left = expires_in(session).await;
        println!(
            "  expires:       {} ({} left)",
            expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            left
        );
    }
    if let Some(role) = stored.selected_role {
        println!("  role:          {}", role.name);
    }
    Ok(())
}

async fn watch(session: &Session) -> Result<()> {
    require_session(session)?;
    let mut time_left = session.time_left_updates();
    let mut state = session.state();

    loop {
        let left = *time_left.borrow_and_update();
        print!("\rSession expires in {}   ", format_countdown(left));
        io::stdout().flush()?;

        tokio::select! {
            changed = time_left.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = state.changed() => {
                if changed.is_err() || !state.borrow_and_update().authenticated {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }
    }

    println!();
    match session.error() {
        Some(reason) => println!("{} Please sign in again.", reason),
        None => println!("Signed out."),
    }
    Ok(())
}

async fn select_role(session: &Session, args: &[String]) -> Result<()> {
    require_session(session)?;
    let Some(slug) = args.first() else {
        bail!("Usage: sessionkeeper role <slug>");
    };
    match session.select_role(slug).await {
        Some(role) => {
            println!("Selected role {} ({}).", role.name, role.slug);
            Ok(())
        }
        None => bail!("The signed-in user has no role '{}'", slug),
    }
}

async fn can_access(session: &Session, args: &[String]) -> Result<()> {
    let Some(module) = args.first() else {
        bail!("Usage: sessionkeeper can-access <module>");
    };
    let allowed = session.store().allows_module(module).await;
    println!("{}", if allowed { "yes" } else { "no" });
    access_verdict(module, allowed)
}

/// A refused module is an error so the process exits non-zero through `main`
fn access_verdict(module: &str, allowed: bool) -> Result<()> {
    if !allowed {
        bail!("Access to module '{}' is not allowed", module);
    }
    Ok(())
}

async fn forgot_password(session: &Session, args: &[String]) -> Result<()> {
    let Some(email) = args.first() else {
        bail!("Usage: sessionkeeper forgot-password <email>");
    };
    let response = session
        .forgot_password(email)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("{}", response.message);
    if let Some(token) = response.token {
        println!("Reset token: {}", token);
    }
    Ok(())
}

async fn reset_password(session: &Session, args: &[String]) -> Result<()> {
    let Some(token) = args.first() else {
        bail!("Usage: sessionkeeper reset-password <token>");
    };
    let password = rpassword::prompt_password("New password: ")?;
    let confirm = rpassword::prompt_password("Repeat new password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    let message = session
        .reset_password(token, &password)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("{}", message);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn require_session(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        bail!("Not signed in. Run `sessionkeeper login` first.");
    }
    Ok(())
}

/// Countdown straight from the stored expiry; the clock may not have ticked yet
async fn expires_in(session: &Session) -> String {
    let left = session
        .store()
        .expiry()
        .await
        .map(|expiry| (expiry - chrono::Utc::now()).num_seconds().max(0));
    format_countdown(left)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No input given");
    }
    Ok(value)
}
