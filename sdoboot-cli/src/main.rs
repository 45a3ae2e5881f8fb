//! sdoboot CLI - host tooling for the SDO bootloader channel.
//!
//! ## Features
//!
//! - Loopback simulation of command download and response upload
//! - Debug console line assembly from a serial port or a capture file
//! - Serial port listing
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Unreadable or invalid configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// Serial device missing or unusable (exit 4).
    #[error("{0}")]
    Device(String),
    /// Interrupted by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Device(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// sdoboot - bootloader communication over CANopen SDO.
///
/// Environment variables:
///   SDOBOOT_CONFIG   - Configuration file path
///   SDOBOOT_PORT     - Console serial port
///   SDOBOOT_BAUD     - Console baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "sdoboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    sdoboot simulate app.cyacd --capacity 64 --json\n  \
    sdoboot console --port /dev/ttyUSB0\n  \
    sdoboot completions bash")]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "SDOBOOT_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Push an image through a loopback channel, command by command.
    Simulate {
        /// Image to transfer.
        image: PathBuf,

        /// Command/response buffer size in bytes.
        #[arg(long)]
        capacity: Option<usize>,

        /// Bytes per download segment (1..=7).
        #[arg(long)]
        fragment: Option<usize>,

        /// Read timeout in 10 ms units (255 waits forever).
        #[arg(long)]
        timeout: Option<u8>,

        /// Node-ID to report.
        #[arg(long)]
        node_id: Option<u8>,

        /// Output the transfer report as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print console commands as the node would parse them.
    Console {
        /// Serial port to read from.
        #[arg(short, long, env = "SDOBOOT_PORT", conflicts_with = "input")]
        port: Option<String>,

        /// Baud rate.
        #[arg(short, long, env = "SDOBOOT_BAUD")]
        baud: Option<u32>,

        /// Replay a capture file instead of opening a port.
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
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

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Ctrl-C handler not installed: {e}");
    }
    sdoboot::set_interrupt_checker(was_interrupted);

    debug!(
        "sdoboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Completions never need configuration.
    if let Commands::Completions { shell, install } = &cli.command {
        return if *install {
            commands::completions::cmd_completions_install(*shell)
        } else {
            let shell = shell.ok_or_else(|| {
                CliError::Usage(
                    "specify a shell type, e.g.: sdoboot completions bash \
                     (or use --install to auto-detect)"
                        .into(),
                )
            })?;
            commands::completions::cmd_completions(shell);
            Ok(())
        };
    }

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()?
    };

    match &cli.command {
        Commands::Simulate {
            image,
            capacity,
            fragment,
            timeout,
            node_id,
            json,
        } => {
            let options = commands::simulate::SimulateOptions {
                capacity: capacity.unwrap_or_else(|| config.capacity()),
                fragment_size: fragment.unwrap_or_else(|| config.fragment_size()),
                timeout_units: timeout.unwrap_or_else(|| config.read_timeout_units()),
                node_id: node_id.or(config.node.node_id),
            };
            commands::simulate::cmd_simulate(cli, image, &options, *json)
        },
        Commands::Console { port, baud, input } => {
            let baud = baud
                .or(config.console.baud)
                .unwrap_or(115_200);
            if let Some(path) = input {
                commands::console::cmd_console_replay(path)
            } else {
                let port = port
                    .clone()
                    .or_else(|| config.console.serial.clone())
                    .ok_or_else(|| {
                        CliError::Usage(
                            "no serial port given; use --port or set [console] serial".into(),
                        )
                    })?;
                commands::console::cmd_console(cli, &port, baud)
            }
        },
        Commands::ListPorts { json } => commands::console::cmd_list_ports(*json),
        Commands::Completions { .. } => Ok(()),
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_simulate() {
        let cli = Cli::try_parse_from([
            "sdoboot",
            "simulate",
            "app.bin",
            "--capacity",
            "64",
            "--fragment",
            "3",
            "--timeout",
            "20",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                image,
                capacity,
                fragment,
                timeout,
                node_id,
                json,
            } => {
                assert_eq!(image, PathBuf::from("app.bin"));
                assert_eq!(capacity, Some(64));
                assert_eq!(fragment, Some(3));
                assert_eq!(timeout, Some(20));
                assert!(node_id.is_none());
                assert!(json);
            },
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_cli_parse_console() {
        let cli =
            Cli::try_parse_from(["sdoboot", "console", "-p", "/dev/ttyUSB0", "-b", "57600"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Console {
                port: Some(_),
                baud: Some(57600),
                input: None
            }
        ));
    }

    #[test]
    fn test_cli_console_port_conflicts_with_input() {
        let result = Cli::try_parse_from([
            "sdoboot",
            "console",
            "--port",
            "/dev/ttyUSB0",
            "--input",
            "capture.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "sdoboot",
            "-vv",
            "--quiet",
            "--config",
            "/tmp/config.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/config.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["sdoboot"]).is_err());
    }

    #[test]
    fn test_cli_rejects_out_of_range_timeout() {
        assert!(Cli::try_parse_from(["sdoboot", "simulate", "a.bin", "--timeout", "256"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("x".into()).into();
        let config: anyhow::Error = CliError::Config("x".into()).into();
        let device: anyhow::Error = CliError::Device("x".into()).into();
        let cancelled: anyhow::Error = CliError::Cancelled("x".into()).into();
        let other = anyhow::anyhow!("boom");

        assert_eq!(exit_code_for(&usage), 2);
        assert_eq!(exit_code_for(&config), 3);
        assert_eq!(exit_code_for(&device), 4);
        assert_eq!(exit_code_for(&cancelled), 130);
        assert_eq!(exit_code_for(&other), 1);
    }
}
