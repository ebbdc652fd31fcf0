//! Partition listing.

use {
    super::open_session,
    crate::{Cli, config::Config},
    anyhow::Result,
    console::style,
    rkflash::{FlashInfo, Partition, PartitionTable},
};

/// JSON view of one partition.
fn partition_json(partition: &Partition) -> serde_json::Value {
    serde_json::json!({
        "name": partition.name,
        "offset": partition.offset_sectors,
        "size": partition.size_sectors,
        "offset_bytes": partition.offset_bytes(),
        "size_bytes": partition.size_bytes(),
    })
}

/// JSON document for a table.
pub(crate) fn table_json(table: &PartitionTable, info: Option<&FlashInfo>) -> serde_json::Value {
    serde_json::json!({
        "flash_size_sectors": info.map(|i| i.flash_size_sectors),
        "partitions": table.iter().map(partition_json).collect::<Vec<_>>(),
    })
}

/// Part command implementation.
pub(crate) fn cmd_part(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut session = open_session(cli, config)?;
    let table = session.load_partitions()?.clone();
    let info = session.cached_flash_info();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&table_json(&table, info.as_ref()))?
        );
        return Ok(());
    }

    if let Some(info) = info {
        eprintln!(
            "{} Flash size: {:.2} GiB",
            style("ℹ").blue(),
            info.size_gib()
        );
    }
    if table.is_empty() {
        eprintln!("  {}", style("No partitions defined").dim());
        return Ok(());
    }
    for partition in table.iter() {
        println!("{partition}");
    }
    Ok(())
}
