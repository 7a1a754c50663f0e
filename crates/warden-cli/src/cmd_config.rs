use clap::Subcommand;
use std::path::{Path, PathBuf};
use warden_store::{global_config_path, load_config, project_config_path, read_config_map};

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Show the effective config (global overlaid by the project's)
    Show {
        /// Project root whose .warden/config.json is overlaid
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Set a config value
    Set {
        /// Config key (e.g. default_provider)
        key: String,
        /// Config value (true/false/number/string/null)
        value: String,
        /// Write to <project>/.warden/config.json instead of the global file
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Get a config value from one file
    Get {
        /// Config key
        key: String,
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Show { project } => show(project.as_deref()),
        ConfigCmd::Set {
            key,
            value,
            project,
        } => set(&target(project.as_deref()), &key, &value),
        ConfigCmd::Get { key, project } => get(&target(project.as_deref()), &key),
    }
}

fn target(project: Option<&Path>) -> PathBuf {
    project.map_or_else(global_config_path, project_config_path)
}

// ── Command Implementations ──

/// `warden config show`
pub fn show(project: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(project)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// `warden config set <key> <value>`
pub fn set(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let stored = warden_store::set_config_value(path, key, value)?;
    println!("{key} = {stored}");
    Ok(())
}

/// `warden config get <key>`
pub fn get(path: &Path, key: &str) -> anyhow::Result<()> {
    let config = read_config_map(path)?;
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => println!("(not set)"),
    }
    Ok(())
}
