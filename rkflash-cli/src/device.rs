//! Loader selection.
//!
//! Picks the Rockchip device a command talks to:
//! - Explicit `--bus`/`--address` narrow the candidate set
//! - A single candidate is used directly
//! - Several candidates prompt via dialoguer, or fail in non-interactive mode
//! - `--wait` polls once per second until a candidate shows up

use {
    crate::CliError,
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    rkflash::{DetectedDevice, device},
    std::{cmp::Ordering, io::IsTerminal, thread, time::Duration},
};

/// Delay between enumerations while waiting for a device.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options for device selection.
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    /// Required USB bus number.
    pub bus: Option<u8>,
    /// Required USB device address.
    pub address: Option<u8>,
    /// Poll until a device appears.
    pub wait: bool,
    /// Never prompt.
    pub non_interactive: bool,
}

impl DeviceOptions {
    fn matches(&self, dev: &DetectedDevice) -> bool {
        self.bus.is_none_or(|bus| dev.bus == bus)
            && self.address.is_none_or(|address| dev.address == address)
    }

    fn describe(&self) -> String {
        match (self.bus, self.address) {
            (Some(bus), Some(address)) => format!(" at bus {bus:03} address {address:03}"),
            (Some(bus), None) => format!(" on bus {bus:03}"),
            (None, Some(address)) => format!(" at address {address:03}"),
            (None, None) => String::new(),
        }
    }
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    // Selection failures are setup problems and map to exit code 2.
    CliError::Usage(message.into()).into()
}

/// Narrow enumerated devices to supported loaders matching the options.
pub fn filter_candidates(
    devices: Vec<DetectedDevice>,
    options: &DeviceOptions,
) -> Vec<DetectedDevice> {
    devices
        .into_iter()
        .filter(|d| d.is_supported() && options.matches(d))
        .collect()
}

fn select_non_interactive(
    candidates: Vec<DetectedDevice>,
    options: &DeviceOptions,
) -> Result<DetectedDevice> {
    match candidates.len().cmp(&1) {
        Ordering::Equal => candidates
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No device available")),
        Ordering::Greater => Err(usage_err(format!(
            "Found multiple Rockchip devices in loader mode{}; pass --bus and --address",
            options.describe()
        ))),
        Ordering::Less => Err(usage_err(format!(
            "No Rockchip device in loader mode found{}",
            options.describe()
        ))),
    }
}

/// Select the device to operate on.
pub fn select_device(options: &DeviceOptions) -> Result<DetectedDevice> {
    let mut announced = false;

    let candidates = loop {
        let candidates = filter_candidates(device::detect_all_devices()?, options);
        debug!("{} candidate device(s)", candidates.len());

        if !candidates.is_empty() || !options.wait {
            break candidates;
        }
        if !announced {
            info!("Waiting for a Rockchip device{}...", options.describe());
            announced = true;
        }
        thread::sleep(POLL_INTERVAL);
    };

    if options.non_interactive || candidates.len() < 2 {
        let dev = select_non_interactive(candidates, options)?;
        info!("Using device: {dev}");
        return Ok(dev);
    }

    ensure_interactive_terminal()?;
    select_device_interactive(candidates)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive prompt requires a terminal; use --non-interactive with --yes or --bus/--address",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Cancelled".to_string()).into()
            } else {
                usage_err(format!("Prompt failed: {io_err}"))
            }
        },
    }
}

fn select_device_interactive(devices: Vec<DetectedDevice>) -> Result<DetectedDevice> {
    eprintln!(
        "{} Found {} Rockchip devices in loader mode",
        style("ℹ").blue(),
        devices.len()
    );

    let labels = device::format_device_list(&devices);
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a device")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => devices
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid device index: {index}")),
        None => Err(CliError::Cancelled("Device selection cancelled".to_string()).into()),
    }
}

/// Ask before a destructive operation.
///
/// `--yes` skips the prompt. Without it, non-interactive mode refuses.
pub fn confirm(prompt: &str, yes: bool, non_interactive: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    if non_interactive {
        return Err(usage_err(format!("{prompt}: refusing without --yes")));
    }
    ensure_interactive_terminal()?;

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Aborted".to_string()).into())
    }
}
