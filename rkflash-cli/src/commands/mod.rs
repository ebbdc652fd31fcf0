//! Command implementations.
//!
//! Each subcommand family is implemented in its own module; this module holds
//! the session and progress plumbing they share.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod partition;

use {
    crate::{Cli, CliError, config::Config, device, use_fancy_output},
    anyhow::{Context, Result},
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    rkflash::{Phase, Session, SessionOptions, UsbTransport},
    std::{path::PathBuf, time::Duration},
};

/// Session options from flags and config.
pub(crate) fn session_options(cli: &Cli, config: &Config) -> SessionOptions {
    let timeout = cli
        .timeout
        .map(Duration::from_millis)
        .or_else(|| config.timeout());
    match timeout {
        Some(timeout) => SessionOptions::default().with_timeout(timeout),
        None => SessionOptions::default(),
    }
}

/// Select a device and open a session on it.
pub(crate) fn open_session(cli: &Cli, config: &Config) -> Result<Session<UsbTransport>> {
    let dev = device::select_device(&cli.device_options(config))?;
    let mut session = Session::open(dev.bus, dev.address, session_options(cli, config))
        .with_context(|| format!("Failed to open {dev}"))?;

    let pb = progress_bar(cli.quiet);
    session.set_progress(progress_callback(pb));
    Ok(session)
}

/// Progress bar on stderr, hidden when quiet or not on a terminal.
fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {msg:10} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Feed session progress into `pb`, restarting the bar on every new pass.
fn progress_callback(pb: ProgressBar) -> impl FnMut(Phase, u64, u64) + 'static {
    let mut current: Option<Phase> = None;
    move |phase, done, total| {
        if current != Some(phase) || done < pb.position() {
            current = Some(phase);
            pb.reset();
            pb.set_length(total);
            pb.set_message(phase.to_string());
        }
        pb.set_position(done);
        if done >= total {
            pb.finish_and_clear();
            current = None;
        }
    }
}

/// Split `PARTITION FILE ...` arguments into pairs.
pub(crate) fn pair_targets(args: &[String]) -> Result<Vec<(String, PathBuf)>> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(CliError::Usage(format!(
            "expected PARTITION FILE pairs, got {} argument(s)",
            args.len()
        ))
        .into());
    }
    Ok(args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), PathBuf::from(&pair[1])))
        .collect())
}
