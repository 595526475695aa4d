mod artifact;
mod config;
mod console;
mod error;
mod launch;
mod lifecycle;
mod lock;
mod restart_macro;
mod session;
mod support;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::error::ManagerError;
use crate::lifecycle::Manager;
use crate::lock::InvocationLock;
use crate::session::{CommandCreate, Tmux};
use crate::support::{TokioPacer, format_error_chain};

const LOG_FILE: &str = "manager.log";

/// Runs a Paper server inside a tmux session and keeps its jar current.
#[derive(Debug, Parser)]
#[command(name = "papermux-manager", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Update the jar if possible, then launch the server in a new session.
    Start,
    /// Warn players, stop the server and kill its session.
    Stop,
    /// Ten-minute countdown broadcast followed by stop and start.
    #[command(alias = "restartmacro")]
    RestartMacro,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::never(".", LOG_FILE);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    tracing::info!(args = ?std::env::args().collect::<Vec<_>>(), "manager invoked");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format_error_chain(&e), "command failed");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), ManagerError> {
    let config = Config::load(&cli.config)?;
    let lock = InvocationLock::acquire(&config.artifact_dir)?;
    tracing::debug!(path = %lock.path().display(), "holding invocation lock");

    let socket = config.tmux_socket.clone();
    let fallback = CommandCreate::new(&config.fallback_create_command, socket.as_deref());
    let manager = Manager::new(config, Tmux::new(socket), fallback, TokioPacer)?;

    match cli.command {
        Command::Start => {
            let artifact = manager.start().await?;
            tracing::info!(path = %artifact.path.display(), "start complete");
        }
        Command::Stop => manager.stop().await?,
        Command::RestartMacro => manager.restart_macro().await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn restart_macro_accepts_legacy_spelling() {
        let cli = Cli::try_parse_from(["papermux-manager", "restartmacro"]).unwrap();
        assert!(matches!(cli.command, Command::RestartMacro));
        let cli = Cli::try_parse_from(["papermux-manager", "restart-macro"]).unwrap();
        assert!(matches!(cli.command, Command::RestartMacro));
    }

    #[test]
    fn config_path_defaults_to_working_directory() {
        let cli = Cli::try_parse_from(["papermux-manager", "stop"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        let cli = Cli::try_parse_from(["papermux-manager", "--config", "/etc/mc.toml", "start"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/mc.toml"));
    }
}
