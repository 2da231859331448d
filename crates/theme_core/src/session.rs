//! Desktop-session reload after a profile has been applied.

use std::{fmt, sync::Arc};

use konsave_interface::{CommandRunner, Invocation, SystemCommandRunner};
use shared::error::{KonsaveError, KonsaveResult};
use tracing::{info, warn};

const SHELL_SERVICE: &str = "plasma-plasmashell";
const WINDOW_MANAGER: &str = "kwin_x11";
const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayProtocol {
    X11,
    Wayland,
    Other(String),
}

impl DisplayProtocol {
    pub fn from_session_type(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "x11" => Self::X11,
            "wayland" => Self::Wayland,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DisplayProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X11 => f.write_str("X11"),
            Self::Wayland => f.write_str("Wayland"),
            Self::Other(value) if value.is_empty() => f.write_str("unknown"),
            Self::Other(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnvironment {
    pub protocol: DisplayProtocol,
    pub shell_version: String,
}

impl SessionEnvironment {
    pub fn new(protocol: DisplayProtocol, shell_version: impl Into<String>) -> Self {
        Self {
            protocol,
            shell_version: shell_version.into(),
        }
    }

    pub async fn detect(runner: &dyn CommandRunner) -> Self {
        let protocol = DisplayProtocol::from_session_type(
            &std::env::var("XDG_SESSION_TYPE").unwrap_or_default(),
        );
        let shell_version = match runner
            .output(&Invocation::new("plasmashell", ["--version"]))
            .await
        {
            Ok(output) => parse_plasmashell_version(&output.stdout),
            Err(err) => {
                warn!("could not read plasmashell version: {err}");
                None
            }
        }
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        Self {
            protocol,
            shell_version,
        }
    }

    pub fn major_version(&self) -> Option<u32> {
        self.shell_version.split('.').next()?.parse().ok()
    }
}

/// Picks the version token from `plasmashell --version` output.
pub fn parse_plasmashell_version(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter(|line| line.to_ascii_lowercase().contains("plasmashell"))
        .flat_map(str::split_whitespace)
        .find(|part| part.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowManagerCommands {
    pub quit: &'static str,
    pub start: &'static str,
}

pub fn window_manager_commands(env: &SessionEnvironment) -> KonsaveResult<WindowManagerCommands> {
    match env.major_version() {
        Some(5) => Ok(WindowManagerCommands {
            quit: "kquitapp5",
            start: "kstart5",
        }),
        Some(6) => Ok(WindowManagerCommands {
            quit: "kquitapp6",
            start: "kstart",
        }),
        _ => Err(KonsaveError::UnsupportedEnvironment(format!(
            "Plasma version '{}' is not supported for a {} session reload",
            env.shell_version, env.protocol
        ))),
    }
}

pub struct SessionReloader {
    runner: Arc<dyn CommandRunner>,
}

impl SessionReloader {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemCommandRunner))
    }

    pub async fn systemd_available(&self) -> bool {
        matches!(
            self.runner
                .output(&Invocation::new("systemctl", ["--version"]))
                .await,
            Ok(output) if output.is_success()
        )
    }

    /// Restarts the shell service and, on X11, cycles the window manager.
    /// Unsupported setups are rejected before anything is restarted.
    pub async fn reload(&self, env: &SessionEnvironment) -> KonsaveResult<()> {
        let window_manager = match env.protocol {
            DisplayProtocol::X11 => Some(window_manager_commands(env)?),
            _ => None,
        };
        if !self.systemd_available().await {
            return Err(KonsaveError::UnsupportedEnvironment(
                "systemd is required to restart the desktop shell".to_string(),
            ));
        }

        self.run_checked(Invocation::new(
            "systemctl",
            ["--user", "restart", SHELL_SERVICE],
        ))
        .await?;
        info!(protocol = %env.protocol, version = %env.shell_version, "desktop shell restarted");

        if let Some(commands) = window_manager {
            self.run_checked(Invocation::new(commands.quit, [WINDOW_MANAGER]))
                .await?;
            self.runner
                .launch(&Invocation::new(commands.start, [WINDOW_MANAGER]))?;
            info!(quit = commands.quit, start = commands.start, "window manager cycled");
        }
        Ok(())
    }

    async fn run_checked(&self, invocation: Invocation) -> KonsaveResult<()> {
        self.runner
            .output(&invocation)
            .await?
            .into_checked(&invocation)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
