//! Shopdesk CLI - a command-line client for the shopdesk tenant API.
//!
//! Signs in, keeps the session alive and fetches business resources through
//! the same session pipeline the graphical front ends use.

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shopdesk_core::api::{ApiError, AuthClient, RequestGateway, Resource, ResourceApi};
use shopdesk_core::auth::{self, LogoutReason, SessionEvent, SessionManager};
use shopdesk_core::Config;

#[derive(Parser, Debug)]
#[command(name = "shopdesk", version, about = "Shopdesk tenant API client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session
    Login {
        /// Account email (defaults to the last one used)
        email: Option<String>,
        /// Tenant slug
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, env = "SHOPDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account, optionally with a new tenant, and sign in
    Register {
        email: String,
        #[arg(long)]
        tenant_name: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, env = "SHOPDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the current session
    Status,
    /// Fetch a resource collection, or one item by id
    Get {
        resource: Resource,
        id: Option<String>,
    },
    /// Keep the session alive and print session events until Ctrl-C
    Watch,
}

/// Initialize the tracing subscriber for logging
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

struct App {
    config: Config,
    session: SessionManager,
    api: ResourceApi,
}

impl App {
    fn build(config: Config) -> Result<Self> {
        let base_url = config.base_url();
        let client = reqwest_client(&config)?;
        let storage = config.open_storage().context("Failed to open session storage")?;

        let auth = AuthClient::with_client(client.clone(), &base_url);
        let session = SessionManager::new(auth, storage, config.session_config());
        session.initialize();
        let api = ResourceApi::new(RequestGateway::new(client, &base_url, session.clone()));

        info!(base_url = %base_url, "Client ready");
        Ok(Self { config, session, api })
    }
}

fn reqwest_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")
}

fn read_password(provided: Option<String>) -> Result<String> {
    match provided {
        Some(password) => Ok(password),
        None => rpassword::prompt_password("Password: ").context("Failed to read password"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;
    let mut app = App::build(config)?;

    match cli.command {
        Command::Login {
            email,
            tenant,
            password,
        } => {
            let email = email
                .or_else(|| app.config.last_email.clone())
                .ok_or_else(|| anyhow::anyhow!("No email given and none remembered"))?;
            let tenant = tenant.or_else(|| app.config.last_tenant_slug.clone());
            let password = read_password(password)?;

            let state = app
                .session
                .login(&email, &password, tenant.as_deref())
                .await?;
            remember_login(&mut app.config, &email, state.tenant().map(|t| t.slug.as_str()))?;
            print_json(&session_summary(&app.session));
        }
        Command::Register {
            email,
            tenant_name,
            tenant,
            password,
        } => {
            let password = read_password(password)?;
            let state = app
                .session
                .register(&email, &password, tenant_name.as_deref(), tenant.as_deref())
                .await?;
            remember_login(&mut app.config, &email, state.tenant().map(|t| t.slug.as_str()))?;
            print_json(&session_summary(&app.session));
        }
        Command::Logout => {
            app.session.logout();
            eprintln!("Logged out");
        }
        Command::Status => {
            print_json(&session_summary(&app.session));
        }
        Command::Get { resource, id } => {
            let result: Result<Value, ApiError> = match id {
                Some(id) => app.api.get(resource, &id).await,
                None => app.api.list(resource).await,
            };
            match result {
                Ok(value) => print_json(&value),
                Err(e) if e.requires_login() => {
                    anyhow::bail!("{} - run `shopdesk login`", e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Watch => watch(&app.session).await?,
    }

    app.session.shutdown();
    Ok(())
}

async fn watch(session: &SessionManager) -> Result<()> {
    if !session.is_authenticated() {
        anyhow::bail!("Not signed in - run `shopdesk login` first");
    }
    let mut events = session.subscribe();
    eprintln!("Keeping session alive, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::LoggedOut { reason: LogoutReason::Expired }) => {
                    anyhow::bail!("Session expired - run `shopdesk login`");
                }
                Ok(event) => eprintln!("{:?}", event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn remember_login(config: &mut Config, email: &str, tenant: Option<&str>) -> Result<()> {
    config.last_email = Some(email.to_string());
    config.last_tenant_slug = tenant.map(str::to_string);
    config.save().context("Failed to save config")
}

fn session_summary(session: &SessionManager) -> Value {
    let state = session.state();
    let expires_at = state
        .access_token()
        .and_then(|t| auth::expires_at(t).ok())
        .map(|t| t.to_rfc3339());
    json!({
        "authenticated": state.is_authenticated(),
        "phase": state.phase,
        "user": state.user(),
        "tenant": state.tenant(),
        "access_token_expires_at": expires_at,
    })
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}
