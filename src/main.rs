use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use atomgate::app::App;
use atomgate::auth::AccountId;
use atomgate::config::Config;
use atomgate::storage::DatabaseError;

#[derive(Parser, Debug)]
#[command(
    name = "atomgate",
    about = "Atom feeds for social network accounts via delegated API access"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short, value_name = "FILE", default_value = "atomgate.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the URL that starts authorization for a new account
    AuthUrl,
    /// Finish authorization with the code the vendor redirected back with
    Authorize {
        #[arg(long)]
        code: String,
    },
    /// Render the Atom feed of an account (or of a page it manages)
    Feed {
        account_id: String,
        page_id: Option<String>,
    },
    /// Show whether an account is authorized, and its profile
    Status { account_id: String },
    /// Forget an account's tokens and cached data
    Forget { account_id: String },
}

fn account_id(raw: &str) -> Result<AccountId> {
    AccountId::new(raw).ok_or_else(|| anyhow::anyhow!("Account id must not be empty"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "atomgate=debug" } else { "atomgate=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let app = match App::open(&config).await {
        Ok(app) => app,
        Err(e) if matches!(e.downcast_ref::<DatabaseError>(), Some(DatabaseError::InstanceLocked)) => {
            eprintln!("Error: the token database is locked by another process.");
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    match args.command {
        Command::AuthUrl => {
            let url = app
                .service
                .authorize_url()
                .context("Invalid authorization endpoint in config")?;
            println!("{url}");
        }
        Command::Authorize { code } => {
            let profile = app
                .tokens
                .complete_authorization(&code)
                .await
                .context("Authorization failed")?;
            println!(
                "Authorized {} ({})",
                profile.display_name.as_deref().unwrap_or("unnamed account"),
                profile.id
            );
        }
        Command::Feed {
            account_id,
            page_id,
        } => {
            let response = app
                .service
                .feed(&account_id, page_id.as_deref(), None)
                .await;
            if response.status != 200 {
                anyhow::bail!("HTTP {}: {}", response.status, response.body);
            }
            println!("{}", response.body);
        }
        Command::Status { account_id: raw } => {
            let id = account_id(&raw)?;
            if !app.tokens.is_authorized(&id).await? {
                println!("{id}: not authorized");
                return Ok(());
            }
            match app.gateway.profile(&id).await {
                Ok(profile) => println!(
                    "{id}: authorized as {}",
                    profile.display_name.as_deref().unwrap_or("unnamed account")
                ),
                Err(e) => println!("{id}: authorized, profile unavailable ({e})"),
            }
        }
        Command::Forget { account_id: raw } => {
            let id = account_id(&raw)?;
            app.tokens
                .revoke(&id)
                .await
                .with_context(|| format!("Failed to forget account {id}"))?;
            println!("Forgot {id}");
        }
    }

    app.db.close().await;
    Ok(())
}
