use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use konsave_interface::DEFAULT_KONSAVE_BIN;
use serde::{Deserialize, Serialize};
use shared::domain::ExportScope;
use theme_core::{ExportOptions, ProgressSchedule};

pub const DEFAULT_CONFIG_FILE: &str = "konui.toml";
const ENV_PREFIX: &str = "KONUI";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub konsave_bin: String,
    pub export_dir: PathBuf,
    /// Run each export in its own staging directory instead of diffing `export_dir` directly.
    pub isolate_exports: bool,
    pub progress_base_delay_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            konsave_bin: DEFAULT_KONSAVE_BIN.into(),
            export_dir: PathBuf::from("."),
            isolate_exports: true,
            progress_base_delay_ms: ProgressSchedule::default().base().as_millis() as u64,
            shutdown_timeout_secs: 10,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn export_options(&self) -> ExportOptions {
        let scope = if self.isolate_exports {
            ExportScope::Isolated
        } else {
            ExportScope::Shared
        };
        ExportOptions::new(&self.export_dir)
            .with_scope(scope)
            .with_schedule(ProgressSchedule::new(Duration::from_millis(
                self.progress_base_delay_ms,
            )))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Defaults, then `konui.toml` (or the explicit `path`, which must exist),
/// then `KONUI__*` environment variables.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    load_with_env(path, Environment::with_prefix(ENV_PREFIX).separator("__"))
}

fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Settings> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };
    let settings = Config::builder()
        .add_source(
            Config::try_from(&Settings::default()).context("failed to encode default settings")?,
        )
        .add_source(file)
        .add_source(env)
        .build()
        .context("failed to load konui settings")?
        .try_deserialize::<Settings>()
        .context("invalid konui settings")?;
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
