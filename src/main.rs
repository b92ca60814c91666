//! repmgrd - Replication manager daemon for a PostgreSQL primary/standby cluster

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repmgrd::config::RepmgrConfig;
use repmgrd::daemon::Daemon;
use repmgrd::error::ExitStatus;

#[derive(Parser)]
#[command(name = "repmgrd", author, version, about = "PostgreSQL replication manager daemon", disable_help_flag = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(short = 'f', long = "config", default_value = "repmgrd.conf")]
    config: PathBuf,

    /// Force debug-level logging regardless of the config file's loglevel
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[arg(short = '?', long = "help", action = clap::ArgAction::Help, help = "Print help")]
    help: Option<bool>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RepmgrConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("repmgrd: {}", e);
            return ExitCode::from(ExitStatus::ErrBadConfig.code() as u8);
        }
    };

    init_logging(cli.verbose, &config.loglevel);

    if !config.logfacility.is_empty() {
        tracing::info!(
            "logfacility '{}' accepted but ignored; logging to stdout/stderr only",
            config.logfacility
        );
    }

    let status = match Daemon::bootstrap(config).await {
        Ok(daemon) => match daemon.run().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("fatal: {}", e);
                e.exit_status()
            }
        },
        Err(e) => {
            tracing::error!("bootstrap failed: {}", e);
            e.exit_status()
        }
    };

    ExitCode::from(status.code() as u8)
}

fn init_logging(verbose: bool, config_loglevel: &str) {
    let directive = if verbose { "debug" } else { config_loglevel };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| directive.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
