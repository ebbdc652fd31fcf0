//! Flash information and device listing.

use {
    super::open_session,
    crate::{Cli, config::Config},
    anyhow::Result,
    console::style,
    rkflash::{DetectedDevice, FlashInfo, device},
};

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut session = open_session(cli, config)?;
    let info = session.read_flash_info()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info_json(&info)?)?);
        return Ok(());
    }

    for line in info_lines(&info) {
        println!("{line}");
    }
    Ok(())
}

fn info_json(info: &FlashInfo) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(info)?;
    value["size_bytes"] = info.size_bytes().into();
    Ok(value)
}

fn info_lines(info: &FlashInfo) -> Vec<String> {
    vec![
        format!("Flash size:      {:.2} GiB ({} sectors)", info.size_gib(), info.flash_size_sectors),
        format!("Block size:      {} sectors", info.block_size),
        format!("Page size:       {} sectors", info.page_size),
        format!("ECC bits:        {}", info.ecc_bits),
        format!("Access time:     {}", info.access_time),
        format!("Manufacturer ID: {:#04x}", info.manufacturer_id),
        format!("Chip select:     {:#04x}", info.chip_select),
    ]
}

/// List devices command implementation.
pub(crate) fn cmd_list_devices(json: bool, all: bool) -> Result<()> {
    let found = if all {
        device::detect_all_devices()?
    } else {
        device::detect_devices()?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&devices_json(&found))?);
        return Ok(());
    }

    let header = if all {
        "USB devices"
    } else {
        "Rockchip devices in loader mode"
    };
    eprintln!("{}", style(header).bold().underlined());
    if found.is_empty() {
        eprintln!("  {}", style("No devices found").dim());
        return Ok(());
    }
    for dev in &found {
        let marker = if dev.is_supported() {
            style("•").green()
        } else {
            style("•").dim()
        };
        println!("  {marker} {dev}");
    }
    Ok(())
}

fn devices_json(devices: &[DetectedDevice]) -> serde_json::Value {
    devices
        .iter()
        .map(|d| {
            serde_json::json!({
                "bus": d.bus,
                "address": d.address,
                "vendor_id": d.vendor_id,
                "product_id": d.product_id,
                "chip": d.chip_name(),
                "supported": d.is_supported(),
            })
        })
        .collect()
}
