pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use ticket_merge_core::config::{CandidateSelection, LogFormat, LoggingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "ticket-merge",
    about = "Duplicate ticket merge workflow CLI",
    long_about = "Run the duplicate ticket merge workflow for one CRM event and check CRM readiness.",
    after_help = "Examples:\n  ticket-merge run --event event.json\n  cat event.json | ticket-merge run\n  ticket-merge config\n  ticket-merge doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a ticket-merge.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Process one workflow event and print its output fields as JSON")]
    Run(RunArgs),
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, build the CRM client and probe CRM reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Clone, Debug, Args)]
pub struct RunArgs {
    #[arg(long, default_value = "-", help = "Event JSON file, or `-` to read stdin")]
    pub event: String,
    #[arg(long, help = "Follow association paging cursors up to the configured page cap")]
    pub paginate: bool,
    #[arg(long, help = "Surviving ticket policy: fetch-order or oldest-created")]
    pub candidate_selection: Option<CandidateSelection>,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Command::Run(args) => commands::run::run(config_path, args),
        Command::Config => commands::config::run(config_path),
        Command::Doctor { json } => commands::doctor::run(config_path, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so stdout carries only
/// the command payload. Repeated calls are ignored.
pub fn init_logging(logging: &LoggingConfig) {
    use tracing::Level;

    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
