//! GPS ingestion server

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use gps_ingest::{
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    errors::IngestError,
    replica::{shutdown_on_signal, Replica, ReplicaSupervisor},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch replica processes sharing the configured address
    Start {
        /// Named environment in the settings file
        #[arg(short, long)]
        env: String,
        /// Settings file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overrides the environment's replica count
        #[arg(short, long)]
        replicas: Option<usize>,
    },
    /// Run a single replica in this process
    #[command(hide = true)]
    Replica {
        #[arg(short, long)]
        env: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        #[arg(long, default_value_t = 0)]
        id: usize,
    },
}

#[tokio::main]
async fn main() {
    #[cfg(feature = "dotenv")]
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), IngestError> {
    match cli.command {
        Command::Start {
            env,
            config,
            replicas,
        } => {
            let app_config = AppConfig::load(&config, &env)?;
            let replicas = replicas.unwrap_or(app_config.settings.replicas).max(1);
            info!(environment = %env, replicas, "Starting replicas");

            let supervisor = ReplicaSupervisor::for_current_exe(
                config.into_os_string(),
                &env,
                replicas,
                app_config.settings.shutdown_grace,
            )?;
            supervisor.run(shutdown_on_signal()).await
        }
        Command::Replica { env, config, id } => {
            let app_config = AppConfig::load(&config, &env)?;
            let replica = Replica::start(id, &app_config.settings).await?;
            replica.run(shutdown_on_signal()).await;
            Ok(())
        }
    }
}
