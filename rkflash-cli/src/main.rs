//! rkflash CLI - Command-line tool for flashing Rockchip SoCs.
//!
//! ## Features
//!
//! - List, flash, verify, back up and erase partitions
//! - Read and write the `@parameter` block
//! - Interactive device selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod device;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or unusable environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// User aborted a prompt (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// rkflash - Flash Rockchip SoCs in USB loader mode.
///
/// Environment variables:
///   RKFLASH_BUS              - USB bus of the target device
///   RKFLASH_ADDRESS          - USB address of the target device
///   RKFLASH_NON_INTERACTIVE  - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rkflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Partition names may be given with or without a leading '@'.\n\
                        Use '@parameter' to target the parameter block.")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// USB bus of the device (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RKFLASH_BUS")]
    bus: Option<u8>,

    /// USB address of the device (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RKFLASH_ADDRESS")]
    address: Option<u8>,

    /// Wait for a device to appear.
    #[arg(short, long, global = true)]
    wait: bool,

    /// USB transfer timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RKFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Skip confirmation prompts.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the partitions of the device.
    #[command(alias = "list")]
    Part {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Flash one or more files and verify them.
    Flash {
        /// Pairs of PARTITION FILE (e.g. boot boot.img @parameter parameter.txt).
        #[arg(required = true, num_args = 2.., value_name = "PARTITION FILE")]
        targets: Vec<String>,

        /// Reboot the device afterwards.
        #[arg(short, long)]
        reboot: bool,
    },

    /// Compare a partition with a file.
    Cmp {
        /// Partition name.
        partition: String,
        /// Image file.
        file: PathBuf,
    },

    /// Back up a partition (or @parameter) to a file.
    Backup {
        /// Partition name.
        partition: String,
        /// Output file.
        file: PathBuf,
    },

    /// Erase a partition.
    Erase {
        /// Partition name.
        partition: String,
    },

    /// Reboot the device.
    Reboot,

    /// Show flash information.
    Info {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// List Rockchip devices in loader mode.
    ListDevices {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,

        /// Include every USB device.
        #[arg(long)]
        all: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell type (auto-detected with --install if omitted).
        shell: Option<Shell>,

        /// Install completions for the current shell.
        #[arg(long)]
        install: bool,
    },
}

impl Cli {
    fn device_options(&self, config: &Config) -> device::DeviceOptions {
        device::DeviceOptions {
            bus: self.bus.or(config.device.bus),
            address: self.address.or(config.device.address),
            wait: self.wait || config.device.wait,
            non_interactive: self.non_interactive,
        }
    }
}

/// Exit code for an error.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

/// Default log filter for the given flags.
///
/// Partition tables and progress are rendered by the CLI, so the library's
/// own lines for them are only shown with `-v`.
fn log_filter(verbose: u8, quiet: bool, fancy: bool) -> String {
    if quiet {
        return "warn".to_string();
    }
    match verbose {
        0 if fancy => "info,rkflash::partition=warn,rkflash::transfer=warn".to_string(),
        0 => "info,rkflash::partition=warn".to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(log_filter(
        cli.verbose,
        cli.quiet,
        use_fancy_output(),
    )))
    .format_target(cli.verbose >= 2)
    .format_timestamp(if cli.verbose >= 2 {
        Some(env_logger::TimestampPrecision::Millis)
    } else {
        None
    })
    .init();

    debug!(
        "rkflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Part { json } => commands::partition::cmd_part(cli, &config, *json),
        Commands::Flash { targets, reboot } => {
            commands::flash::cmd_flash(cli, &config, targets, *reboot)
        },
        Commands::Cmp { partition, file } => {
            commands::flash::cmd_compare(cli, &config, partition, file)
        },
        Commands::Backup { partition, file } => {
            commands::flash::cmd_backup(cli, &config, partition, file)
        },
        Commands::Erase { partition } => commands::flash::cmd_erase(cli, &config, partition),
        Commands::Reboot => commands::flash::cmd_reboot(cli, &config),
        Commands::Info { json } => commands::info::cmd_info(cli, &config, *json),
        Commands::ListDevices { json, all } => commands::info::cmd_list_devices(*json, *all),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: rkflash completions bash \
                         (or use --install to auto-install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}
