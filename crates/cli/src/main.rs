//! PricePulse CLI - track product prices from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (prompts for the password)
//! pricepulse login -e you@example.com
//!
//! # Track a product and list everything tracked
//! pricepulse track https://www.amazon.com/dp/B0EXAMPLE
//! pricepulse list
//!
//! # Show 90 days of price history
//! pricepulse show <product-id> --range 90
//!
//! # Email me when it drops to 49.99
//! pricepulse alert <product-id> --price 49.99
//!
//! # Keep refreshing until Ctrl-C
//! pricepulse watch
//! ```
//!
//! # Environment Variables
//!
//! See `pricepulse_client::config` for backend settings. In addition:
//! - `RUST_LOG` - Log filter (default: `pricepulse_client=info,pricepulse_cli=info`)
//! - `PRICEPULSE_LOG_FORMAT` - `json` for structured output
//! - `SENTRY_DSN` - Enables error reporting

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use clap::{Parser, Subcommand};

use pricepulse_client::config::parse_base_url;
use pricepulse_client::session::FileStorage;
use pricepulse_client::{ClientConfig, ClientError, PricePulse};
use pricepulse_core::HistoryRange;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "pricepulse")]
#[command(author, version, about = "Track product prices and get alerted on drops")]
struct Cli {
    /// Backend base URL (overrides `PRICEPULSE_API_URL`)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Sign in through the federated identity provider
    LoginFederated {
        /// Redirect URL the provider sent you back to (prompted if omitted)
        #[arg(long)]
        redirect_url: Option<String>,
    },
    /// Create an account, verifying the email with a one-time code
    Register {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Sign out and forget the saved session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Start tracking a product URL
    Track {
        /// Product page URL
        url: String,
    },
    /// List tracked products
    List,
    /// Show a product's price history
    Show {
        /// Product ID
        id: String,

        /// History range: 7, 30, 90 or all
        #[arg(short, long, default_value = "30")]
        range: HistoryRange,
    },
    /// Stop tracking and delete a product
    Remove {
        /// Product ID
        id: String,
    },
    /// Pause price checks for a product
    Pause {
        /// Product ID
        id: String,
    },
    /// Resume price checks for a product
    Resume {
        /// Product ID
        id: String,
    },
    /// Get emailed when a product drops to a target price
    Alert {
        /// Product ID
        id: String,

        /// Target price
        #[arg(short, long)]
        price: String,

        /// Notification email (defaults to the account email)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// List price alerts
    Alerts,
    /// Delete a price alert
    Unalert {
        /// Alert ID
        id: String,
    },
    /// Keep the product list (and optionally one product) fresh until Ctrl-C
    Watch {
        /// Also refresh this product's history
        #[arg(long)]
        product: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _sentry_guard = telemetry::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url.as_deref() {
        config.api_base_url = parse_base_url(api_url)?;
    }

    let storage = Arc::new(FileStorage::new(config.session_file.clone()));
    let client = PricePulse::new(config, storage)?;
    let _sentry_user = telemetry::track_session_user(client.session());

    client.session().restore().await;

    match cli.command {
        Commands::Login { email, password } => {
            commands::auth::login(&client, &email, password).await?;
        }
        Commands::LoginFederated { redirect_url } => {
            commands::auth::login_federated(&client, redirect_url).await?;
        }
        Commands::Register { email, name } => commands::auth::register(&client, &email, name).await?,
        Commands::Logout => commands::auth::logout(&client).await?,
        Commands::Whoami => commands::auth::whoami(&client),
        Commands::Track { url } => commands::products::track(&client, &url).await?,
        Commands::List => commands::products::list(&client).await?,
        Commands::Show { id, range } => commands::products::show(&client, &id, range).await?,
        Commands::Remove { id } => commands::products::remove(&client, &id).await?,
        Commands::Pause { id } => commands::products::set_tracking(&client, &id, false).await?,
        Commands::Resume { id } => commands::products::set_tracking(&client, &id, true).await?,
        Commands::Alert { id, price, email } => {
            commands::alerts::create(&client, &id, &price, email.as_deref()).await?;
        }
        Commands::Alerts => commands::alerts::list(&client).await?,
        Commands::Unalert { id } => commands::alerts::delete(&client, &id).await?,
        Commands::Watch { product } => commands::products::watch(&client, product).await?,
    }
    Ok(())
}
