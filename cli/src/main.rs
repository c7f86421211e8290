//! cordlink CLI - binary entry point.
//!
//! ```text
//! main() -> CordlinkConfig::load() -> init_tracing() -> Runtime::build()
//!                                                          |
//!                                     SubprocessTransport -+- AdapterSlot -- Delivery
//!                                                          |
//!                                                   commands::run(cmd)
//! ```

mod commands;
mod runtime;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cordlink_config::{CordlinkConfig, LoggingConfig, config_path};

use crate::commands::Cmd;
use crate::runtime::Runtime;

#[derive(Parser)]
#[command(name = "cordlink")]
#[command(version, about = "Drive the Discord Social SDK through its subprocess")]
struct Cli {
    /// Subprocess binary; overrides config and CORDLINK_SUBPROCESS.
    #[arg(long, global = true)]
    binary: Option<PathBuf>,

    /// Discord Social SDK directory; overrides config and DISCORD_SDK_PATH.
    #[arg(long, global = true)]
    sdk_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

/// `RUST_LOG`, then `logging.filter`, then `info`.
fn filter_directives(from_env: Option<String>, logging: &LoggingConfig) -> String {
    let base = from_env
        .filter(|raw| !raw.trim().is_empty())
        .or_else(|| logging.filter.clone())
        .unwrap_or_else(|| "info".to_string());
    if logging.quiet_polling {
        format!("{base},cordlink::poll=warn")
    } else {
        base
    }
}

fn build_filter(logging: &LoggingConfig) -> EnvFilter {
    let directives = filter_directives(std::env::var(EnvFilter::DEFAULT_ENV).ok(), logging);
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {directives:?}: {e}; using \"info\"");
        EnvFilter::new("info")
    })
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = build_filter(logging);
    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Command output owns stdout.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            )),
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // ~/.cordlink/logs/cordlink.log
    if let Some(path) = config_path()
        && let Some(dir) = path.parent()
    {
        candidates.push(dir.join("logs").join("cordlink.log"));
    }

    candidates.push(PathBuf::from(".cordlink").join("logs").join("cordlink.log"));
    candidates
}

async fn run(cli: Cli, config: CordlinkConfig) -> Result<()> {
    let runtime = Runtime::build(&config, cli.binary, cli.sdk_dir)?;
    let outcome = commands::run(&runtime, &config, cli.command).await;
    runtime.shutdown().await;
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is configured from the file, so a broken file is reported on
    // stderr before the subscriber exists.
    let config = match CordlinkConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_polling_demotes_poll_target() {
        let mut logging = LoggingConfig {
            filter: Some("debug".to_string()),
            quiet_polling: true,
        };
        assert_eq!(filter_directives(None, &logging), "debug,cordlink::poll=warn");
        assert_eq!(
            filter_directives(Some("trace".to_string()), &logging),
            "trace,cordlink::poll=warn"
        );
        logging.quiet_polling = false;
        logging.filter = None;
        assert_eq!(filter_directives(Some("  ".to_string()), &logging), "info");
    }

    #[test]
    fn cli_parses_send_lobby() {
        let cli = Cli::try_parse_from(["cordlink", "send-lobby", "42", "hello there"]).unwrap();
        assert!(matches!(cli.command, Cmd::SendLobby { lobby_id, .. } if lobby_id.value() == 42));
    }

    #[test]
    fn cli_parses_send_channel() {
        let cli =
            Cli::try_parse_from(["cordlink", "send-channel", "77", "status update"]).unwrap();
        assert!(matches!(
            cli.command,
            Cmd::SendChannel { channel_id, ref content }
                if channel_id.value() == 77 && content == "status update"
        ));
    }

    #[test]
    fn history_limit_defaults_to_protocol_page_size() {
        let cli = Cli::try_parse_from(["cordlink", "history", "42"]).unwrap();
        let Cmd::History { limit, .. } = cli.command else {
            panic!("expected history");
        };
        assert_eq!(limit, cordlink_transport::protocol::DEFAULT_MESSAGE_LIMIT);
    }

    #[test]
    fn log_candidates_end_with_local_fallback() {
        let candidates = log_file_candidates();
        assert_eq!(
            candidates.last(),
            Some(&PathBuf::from(".cordlink/logs/cordlink.log"))
        );
    }
}
