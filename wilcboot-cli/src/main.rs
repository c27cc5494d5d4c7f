//! wilcboot CLI - Command-line tool for bringing up WILC combo radio controllers.
//!
//! ## Features
//!
//! - Download controller firmware over a serial HCI link
//! - Switch the line to its operational rate, with optional flow control
//! - Program or read back the device address
//! - Inspect how a baud rate would be produced
//! - Shell completion generation
//! - Environment variable and configuration file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        sync::atomic::{AtomicBool, Ordering},
    },
    wilcboot::{
        LineCaps,
        port::baud::{DEFAULT_BASE_CLOCK, DEFAULT_LINE_MAX},
    },
};

mod commands;
mod config;
mod serial;

use {
    commands::bringup::BringupArgs,
    config::Config,
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing input (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration value (exit 3).
    #[error("{0}")]
    Config(String),
    /// The serial device could not be opened (exit 4).
    #[error("{0}")]
    Device(String),
}

/// wilcboot - Firmware bring-up for WILC combo radio controllers.
///
/// Environment variables:
///   WILCBOOT_PORT       - Serial port
///   WILCBOOT_FIRMWARE   - Firmware image
///   WILCBOOT_BAUD       - Operational baud rate
///   WILCBOOT_ADDRESS    - Device address to program
///   WILCBOOT_CHIP       - Chip name
#[derive(Parser)]
#[command(name = "wilcboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    wilcboot -p /dev/ttyS1 bringup wilc3000_bt_firmware.bin\n  \
    wilcboot bringup --operational-baud 3000000 --flow-control\n  \
    wilcboot baud 3000000 --json")]
pub(crate) struct Cli {
    /// Serial port to use (auto-selected when only one exists).
    #[arg(short, long, global = true, env = "WILCBOOT_PORT")]
    pub port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Download firmware and bring the controller up.
    Bringup(BringupArgs),

    /// Show how a baud rate is produced on the host line.
    Baud {
        /// Rate to match.
        rate: u32,

        /// Highest native rate of the host UART.
        #[arg(long, value_name = "BAUD")]
        line_max: Option<u32>,

        /// Base clock of the host UART in Hz.
        #[arg(long, value_name = "HZ")]
        base_clock: Option<u32>,

        /// Output the plan as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Map an error to the process exit code.
fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Config(_) => 3,
                CliError::Device(_) => 4,
            };
        }
        if let Some(wilcboot::Error::Config(_)) = cause.downcast_ref::<wilcboot::Error>() {
            return 3;
        }
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    debug!(
        "wilcboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match &cli.command {
        Commands::Bringup(args) => {
            let config = load_config(cli);
            commands::bringup::cmd_bringup(cli, &config, args)
        },
        Commands::Baud {
            rate,
            line_max,
            base_clock,
            json,
        } => {
            let config = load_config(cli);
            let line = LineCaps {
                line_max: line_max
                    .or(config
                        .serial
                        .line_max)
                    .unwrap_or(DEFAULT_LINE_MAX),
                base_clock: base_clock
                    .or(config
                        .serial
                        .base_clock)
                    .unwrap_or(DEFAULT_BASE_CLOCK),
            };
            commands::baud::cmd_baud(*rate, line, *json)
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

fn load_config(cli: &Cli) -> Config {
    if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    }
}

fn main() {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for_error(&err));
    }
}
