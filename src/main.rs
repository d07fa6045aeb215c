use std::process::ExitCode;
use std::sync::Arc;

use authkit::backend::memory::{MemoryBackend, profile_row};
use authkit::backend::rest::RestBackend;
use authkit::backend::{AuthBackend, ProfileTable};
use authkit::config::{BackendConfig, ConfigError};
use authkit::error::{DomainError, StoreError};
use authkit::facade::AuthContext;
use authkit::models::{NewProfile, ProfileUpdate, SignUpMetadata, UserAttributes};
use authkit::store::app::{Notification, NotificationKind};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

const OFFLINE_EMAIL: &str = "demo@example.com";
const OFFLINE_PASSWORD: &str = "demo-password";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("missing credentials; pass --email/--password or set AUTHKIT_EMAIL/AUTHKIT_PASSWORD")]
    MissingCredentials,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "authkit", about = "Session and profile client for the hosted backend")]
struct Cli {
    /// Use an in-process backend seeded with a demo account instead of the platform.
    #[arg(long, default_value_t = false)]
    offline: bool,

    #[command(flatten)]
    credentials: Credentials,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Credentials {
    #[arg(long, env = "AUTHKIT_EMAIL", global = true)]
    email: Option<String>,

    #[arg(long, env = "AUTHKIT_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new account.
    SignUp {
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Sign in and print the session user.
    SignIn,
    /// Sign in if needed, then end the session.
    SignOut,
    /// Print the signed-in user, signing in if no session was restored.
    Whoami,
    /// Send a password recovery email.
    ResetPassword {
        #[arg(value_name = "EMAIL")]
        address: String,
    },
    Profile(ProfileCommand),
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    Create {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    Update {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
        /// Mirror the changes into the auth user's metadata too.
        #[arg(long, default_value_t = false)]
        sync_metadata: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    if dotenvy::dotenv().is_err() {
        tracing::debug!("no .env file loaded");
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = build_context(cli.offline)?;
    if let Err(e) = ctx.mount().await {
        tracing::warn!(error = %e, "no stored session");
    }

    let mut credentials = cli.credentials;
    if cli.offline && credentials.email.is_none() {
        credentials.email = Some(OFFLINE_EMAIL.to_owned());
        credentials.password = Some(OFFLINE_PASSWORD.to_owned());
    }

    let result = dispatch(&ctx, &credentials, cli.command).await;
    print_notifications(&ctx.app().snapshot().notifications);
    ctx.dispose().await;
    result
}

fn build_context(offline: bool) -> Result<AuthContext, CliError> {
    if offline {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.add_account(OFFLINE_EMAIL, OFFLINE_PASSWORD);
        backend.put_row(profile_row(&user.id, "Demo User"));
        tracing::info!(email = OFFLINE_EMAIL, "using offline backend");
        return Ok(AuthContext::create(backend.clone(), backend));
    }
    let config = BackendConfig::from_env()?;
    tracing::info!(url = %config.url, table = %config.profile_table, "using platform backend");
    let backend = Arc::new(RestBackend::new(config)?);
    let auth: Arc<dyn AuthBackend> = backend.clone();
    let table: Arc<dyn ProfileTable> = backend;
    Ok(AuthContext::create(auth, table))
}

async fn dispatch(ctx: &AuthContext, credentials: &Credentials, command: Command) -> Result<(), CliError> {
    match command {
        Command::SignUp { full_name } => {
            let (email, password) = require_credentials(credentials)?;
            let response = ctx.sign_up(&email, &password, SignUpMetadata { full_name }).await?;
            if response.session.is_some() {
                ctx.app().add_notification(NotificationKind::Success, "Account created", None);
            } else {
                ctx.app()
                    .add_notification(NotificationKind::Info, "Check your email", Some("Confirm the address to sign in"));
            }
            print_json(&response.user)
        }
        Command::SignIn => {
            sign_in(ctx, credentials).await?;
            ctx.app().add_notification(NotificationKind::Success, "Signed in", None);
            print_json(&ctx.user())
        }
        Command::SignOut => {
            sign_in(ctx, credentials).await?;
            ctx.sign_out().await?;
            ctx.app().add_notification(NotificationKind::Success, "Signed out", None);
            Ok(())
        }
        Command::Whoami => {
            sign_in(ctx, credentials).await?;
            print_json(&ctx.user())
        }
        Command::ResetPassword { address } => {
            ctx.reset_password(&address).await?;
            ctx.app().add_notification(NotificationKind::Success, "Recovery email sent", Some(&address));
            Ok(())
        }
        Command::Profile(profile) => run_profile(ctx, credentials, profile).await,
    }
}

async fn run_profile(ctx: &AuthContext, credentials: &Credentials, profile: ProfileCommand) -> Result<(), CliError> {
    let user_id = sign_in(ctx, credentials).await?;
    match profile.command {
        ProfileSubcommand::Show => {
            if let Some(err) = ctx.status().errors().into_iter().next() {
                return Err(err.into());
            }
            print_json(&ctx.profile())
        }
        ProfileSubcommand::Create { full_name, avatar_url } => {
            let email = ctx.user().and_then(|u| u.email);
            let row = ctx
                .create_user_profile(NewProfile { id: user_id, email, full_name, avatar_url })
                .await?;
            ctx.app().add_notification(NotificationKind::Success, "Profile created", None);
            print_json(&row)
        }
        ProfileSubcommand::Update { full_name, avatar_url, sync_metadata } => {
            let updates = ProfileUpdate {
                full_name: full_name.clone(),
                avatar_url: avatar_url.clone(),
                ..ProfileUpdate::default()
            };
            let row = ctx.update_user_profile(&user_id, updates).await?;
            if sync_metadata {
                ctx.update_user(UserAttributes { full_name, avatar_url }).await?;
            }
            ctx.app().add_notification(NotificationKind::Success, "Profile saved", None);
            print_json(&row)
        }
    }
}

/// Sign in unless a session was restored on mount. Returns the user id.
async fn sign_in(ctx: &AuthContext, credentials: &Credentials) -> Result<String, CliError> {
    if let Some(user_id) = ctx.user_id() {
        return Ok(user_id);
    }
    let (email, password) = require_credentials(credentials)?;
    let session = ctx.sign_in(&email, &password).await?;
    Ok(session.user.id)
}

fn require_credentials(credentials: &Credentials) -> Result<(String, String), CliError> {
    match (&credentials.email, &credentials.password) {
        (Some(email), Some(password)) => Ok((email.clone(), password.clone())),
        _ => Err(CliError::MissingCredentials),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn print_notifications(notifications: &[Notification]) {
    for n in notifications {
        match &n.message {
            Some(message) => eprintln!("[{:?}] {}: {message}", n.kind, n.title),
            None => eprintln!("[{:?}] {}", n.kind, n.title),
        }
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
