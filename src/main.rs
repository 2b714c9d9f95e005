use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repairshop::config::CliOverrides;
use repairshop::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "repairshop")]
#[command(version, about = "Computer repair shop back-end: customers and service tickets")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to repairshop.toml (defaults to ./repairshop.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Permissive CORS, bind on all interfaces
        #[arg(long)]
        dev: bool,
        /// Open the ticket page in a browser once started
        #[arg(long)]
        open: bool,
    },
    /// Create the database and run migrations, then exit
    Init {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init_subscriber(cli.verbose, format);

    match &cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            open,
        } => {
            let overrides = CliOverrides {
                port: *port,
                db_path: db_path.clone(),
                dev_mode: *dev,
            };
            cmd::cmd_serve(cli.config.as_deref(), overrides, *open).await?;
        }
        Commands::Init { db_path } => {
            cmd::cmd_init(cli.config.as_deref(), db_path.clone())?;
        }
    }

    Ok(())
}
