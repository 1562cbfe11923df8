mod auth_commands;
mod config_commands;
mod db_commands;

use std::path::PathBuf;

use {
    anyhow::bail,
    chrono::{DateTime, Utc},
    clap::{Parser, Subcommand},
    ctigate_config::{CtigateConfig, Severity},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "ctigate", about = "ctigate: TAXII 1.1 threat intelligence server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery of ctigate.{toml,yaml,yml,json}).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the configuration and start the server (default).
    Serve,
    /// Apply configured services, collections and accounts to the database.
    Sync,
    /// Remove content blocks labelled within a window from a collection.
    DeleteBlocks {
        /// Collection name.
        #[arg(long)]
        collection: String,
        /// Exclusive start of the window (RFC 3339).
        #[arg(long)]
        begin: DateTime<Utc>,
        /// Inclusive end of the window (RFC 3339). Open-ended when omitted.
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// Create an account, or reset the password of an existing one.
    CreateAccount {
        #[arg(long)]
        username: String,
        #[arg(long, env = "CTIGATE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the configuration and refuse to continue on validation errors.
fn load_config(cli: &Cli) -> anyhow::Result<CtigateConfig> {
    let mut config = ctigate_config::discover_and_load(cli.config.as_deref())?;
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let result = ctigate_config::validate_config(&config);
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(path = diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(path = diagnostic.path, "{}", diagnostic.message),
            Severity::Info => info!(path = diagnostic.path, "{}", diagnostic.message),
        }
    }
    if result.has_errors() {
        bail!(
            "configuration has {} error(s); run `ctigate config check` for details",
            result.count(Severity::Error)
        );
    }
    Ok(config)
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let (persistence, accounts) =
        ctigate_gateway::open_database(&config.database, &config.auth).await?;
    ctigate_gateway::sync_config(persistence.as_ref(), &accounts, &config).await?;

    let expired = accounts.cleanup_expired_tokens().await?;
    if expired > 0 {
        info!(expired, "expired tokens removed");
    }

    let state = ctigate_gateway::GatewayState::load(&config, persistence, accounts).await?;
    ctigate_gateway::start_gateway(state, &config.server.bind, config.server.port).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "ctigate starting");

    match &cli.command {
        None | Some(Commands::Serve) => serve(&cli).await,
        Some(Commands::Sync) => db_commands::sync(&load_config(&cli)?).await,
        Some(Commands::DeleteBlocks {
            collection,
            begin,
            end,
        }) => db_commands::delete_blocks(&load_config(&cli)?, collection, *begin, *end).await,
        Some(Commands::CreateAccount { username, password }) => {
            auth_commands::create_account(&load_config(&cli)?, username, password.clone()).await
        },
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}
