//! Flash, compare, backup, erase and reboot commands.

use {
    super::{open_session, pair_targets},
    crate::{Cli, config::Config, device::confirm},
    anyhow::{Context, Result},
    console::style,
    rkflash::session::is_parameter_target,
    std::{fs, path::Path},
};

/// Fail early when an input file cannot be used.
fn check_input(path: &Path) -> Result<()> {
    let meta =
        fs::metadata(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("{} is not a regular file", path.display());
    }
    Ok(())
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, targets: &[String], reboot: bool) -> Result<()> {
    let pairs = pair_targets(targets)?;
    for (_, path) in &pairs {
        check_input(path)?;
    }

    let names: Vec<&str> = pairs.iter().map(|(target, _)| target.as_str()).collect();
    confirm(
        &format!("Overwrite {} on the device?", names.join(", ")),
        cli.yes,
        cli.non_interactive,
    )?;

    let mut session = open_session(cli, config)?;

    for (target, path) in &pairs {
        if !cli.quiet {
            eprintln!(
                "{} Flashing {} to {}",
                style("📦").cyan(),
                style(path.display()).yellow(),
                style(target).cyan()
            );
        }
        session
            .flash_file(target, path)
            .with_context(|| format!("Failed to flash {target}"))?;
        if !cli.quiet {
            let note = if is_parameter_target(target) {
                "written"
            } else {
                "written and verified"
            };
            eprintln!("{} {target} {note}", style("✓").green());
        }
    }

    if reboot {
        if !cli.quiet {
            eprintln!("{} Rebooting device", style("🔄").cyan());
        }
        session.reboot()?;
    }

    if !cli.quiet {
        eprintln!("\n{} Flashing completed!", style("🎉").green().bold());
    }
    Ok(())
}

/// Compare command implementation.
pub(crate) fn cmd_compare(cli: &Cli, config: &Config, partition: &str, file: &Path) -> Result<()> {
    check_input(file)?;
    let mut session = open_session(cli, config)?;

    session
        .compare_file(partition, file)
        .with_context(|| format!("Failed to compare {partition} with {}", file.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {partition} matches {}",
            style("✓").green(),
            file.display()
        );
    }
    Ok(())
}

/// Backup command implementation.
pub(crate) fn cmd_backup(cli: &Cli, config: &Config, partition: &str, file: &Path) -> Result<()> {
    let mut session = open_session(cli, config)?;

    session
        .backup_file(partition, file)
        .with_context(|| format!("Failed to back up {partition}"))?;

    if !cli.quiet {
        eprintln!(
            "{} {partition} saved to {}",
            style("✓").green(),
            style(file.display()).yellow()
        );
    }
    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, partition: &str) -> Result<()> {
    confirm(
        &format!("Erase {partition}? All data in it will be lost"),
        cli.yes,
        cli.non_interactive,
    )?;
    let mut session = open_session(cli, config)?;

    session
        .erase(partition)
        .with_context(|| format!("Failed to erase {partition}"))?;

    if !cli.quiet {
        eprintln!("{} {partition} erased", style("✓").green());
    }
    Ok(())
}

/// Reboot command implementation.
pub(crate) fn cmd_reboot(cli: &Cli, config: &Config) -> Result<()> {
    confirm("Reboot the device?", cli.yes, cli.non_interactive)?;
    let mut session = open_session(cli, config)?;

    if !cli.quiet {
        eprintln!("{} Rebooting device", style("🔄").cyan());
    }
    session.reboot()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_input(&dir.path().join("missing.img")).unwrap_err();
        assert!(err.to_string().contains("missing.img"));
    }

    #[test]
    fn test_check_input_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_input(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[test]
    fn test_check_input_accepts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.img");
        fs::write(&path, [0u8; 16]).unwrap();
        assert!(check_input(&path).is_ok());
    }
}
