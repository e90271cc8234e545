use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// PSRP out-of-process server.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen on a named pipe (local socket) instead of stdin/stdout.
    #[arg(long, help = "Use a named pipe for communications rather than stdin/stdout")]
    pub pipe: bool,

    /// Pipe path to listen on. Defaults to the path PowerShell derives
    /// for this process.
    #[arg(long, value_name = "PATH", help = "Custom pipe name to listen on when --pipe is set")]
    pub pipe_name: Option<PathBuf>,

    /// Enable file logging to the given path.
    #[arg(long, value_name = "PATH", help = "Enable file logging to the file at this path")]
    pub log_file: Option<PathBuf>,

    /// Logging threshold when --log-file is set.
    #[arg(long, value_enum, default_value_t = LogLevel::Info, help = "Set the logging filter level when --log-file is set")]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Info,
    Debug,
    Warning,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Install the file-backed subscriber. Stdout stays untouched: in stdio
/// mode it carries protocol packets, never log lines.
pub fn init_logging(path: &PathBuf, level: LogLevel) -> anyhow::Result<()> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let directive = level.directive();
    let filter = EnvFilter::new(format!(
        "ferroposh_server={directive},ferroposh_core={directive},ferroposh_psrp={directive}"
    ));

    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(log_file)
        .init();
    Ok(())
}
