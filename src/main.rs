use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use coursehub::config::{AppConfig, CliOverrides, DEFAULT_CONFIG_PATH, LogFormat, LoggingSection};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "coursehub")]
#[command(version, about = "Course-selling back end with ordered lesson navigation")]
pub struct Cli {
    /// Path to coursehub.toml
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level regardless of the configured filter
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations, then exit
    InitDb {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
}

fn init_tracing(logging: &LoggingSection, verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("coursehub=debug,tower_http=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.filter))
    };
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let overrides = match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => CliOverrides {
            host: host.clone(),
            port: *port,
            db_path: db_path.clone(),
            dev: *dev,
        },
        Commands::InitDb { db_path } => CliOverrides {
            db_path: db_path.clone(),
            ..CliOverrides::default()
        },
        Commands::Config { .. } => CliOverrides::default(),
    };
    let config = AppConfig::resolve(&cli.config, &overrides)?;
    init_tracing(&config.logging, cli.verbose);

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::InitDb { .. } => cmd::cmd_init_db(&config)?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command.clone())?,
    }

    Ok(())
}
