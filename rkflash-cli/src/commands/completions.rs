//! Shell completion generation and installation.

use {
    crate::{Cli, CliError},
    anyhow::{Context, Result},
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    console::style,
    directories::BaseDirs,
    std::{
        env, fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
    },
};

const BIN_NAME: &str = "rkflash";

/// Write the completion script for `shell` into `out`.
fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

/// Detect the user's shell from `$SHELL`.
fn detect_shell_type() -> Option<Shell> {
    env::var("SHELL").ok().and_then(|path| shell_from_path(&path))
}

/// Map a shell binary path to a `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    match Path::new(shell_path).file_name()?.to_str()? {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Where the completion script for `shell` is installed.
fn install_path(shell: Shell, dirs: &BaseDirs) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data_dir()
            .join("bash-completion")
            .join("completions")
            .join(BIN_NAME),
        Shell::Zsh => dirs.home_dir().join(".zfunc").join(format!("_{BIN_NAME}")),
        Shell::Fish => dirs
            .config_dir()
            .join("fish")
            .join("completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::Elvish => dirs
            .config_dir()
            .join("elvish")
            .join("lib")
            .join(format!("{BIN_NAME}.elv")),
        _ => {
            return Err(CliError::Usage(format!(
                "automatic installation is not supported for {shell}; \
                 redirect `{BIN_NAME} completions {shell}` instead"
            ))
            .into());
        },
    };
    Ok(path)
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = shell_arg.or_else(detect_shell_type).ok_or_else(|| {
        CliError::Usage(format!(
            "could not detect your shell, specify it explicitly: {BIN_NAME} completions --install bash"
        ))
    })?;
    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    let path = install_path(shell, &dirs)?;

    let mut buf = Vec::new();
    write_completions(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(shell).cyan(),
        style(path.display()).yellow()
    );

    match shell {
        Shell::Bash => {
            eprintln!(
                "To activate now: {}",
                style(format!("source {}", path.display())).cyan()
            );
        },
        Shell::Zsh => {
            let zshrc = dirs.home_dir().join(".zshrc");
            let fpath_line = "fpath=(~/.zfunc $fpath)";
            let has_fpath = fs::read_to_string(&zshrc)
                .map(|content| content.contains(fpath_line))
                .unwrap_or(false);

            if !has_fpath {
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&zshrc)
                    .with_context(|| format!("Failed to update {}", zshrc.display()))?;
                writeln!(file, "\n# {BIN_NAME} completions")?;
                writeln!(file, "{fpath_line}")?;
                writeln!(file, "autoload -Uz compinit && compinit")?;
                eprintln!(
                    "{} Added fpath to {}",
                    style("✓").green().bold(),
                    style(zshrc.display()).yellow()
                );
            }
            eprintln!("Restart your shell or run: {}", style("exec zsh").cyan());
        },
        _ => eprintln!("Completions load automatically in new sessions."),
    }

    Ok(())
}
