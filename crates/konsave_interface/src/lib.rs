use std::{path::Path, sync::Arc};

use regex::Regex;
use shared::{
    domain::Profile,
    error::{KonsaveError, KonsaveResult},
};
use tracing::{info, warn};

mod runner;

pub use runner::{CommandOutput, CommandRunner, Invocation, RunningCommand, SystemCommandRunner};

pub const DEFAULT_KONSAVE_BIN: &str = "konsave";

/// Adapter over the `konsave` CLI. Every operation is one invocation whose
/// stdout/stderr/exit code is the whole contract.
#[derive(Clone)]
pub struct KonsaveInterface {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl KonsaveInterface {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: DEFAULT_KONSAVE_BIN.to_string(),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemCommandRunner))
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.program.clone(), args)
    }

    async fn run_checked(&self, invocation: Invocation) -> KonsaveResult<CommandOutput> {
        self.runner
            .output(&invocation)
            .await?
            .into_checked(&invocation)
    }

    pub async fn version(&self) -> Option<String> {
        match self.runner.output(&self.invocation(["--version"])).await {
            Ok(output) => parse_version(&output.stdout),
            Err(err) => {
                warn!("could not query konsave version: {err}");
                None
            }
        }
    }

    pub async fn is_installed(&self) -> bool {
        self.version().await.is_some()
    }

    pub async fn list_profiles(&self) -> KonsaveResult<Vec<Profile>> {
        let output = self.run_checked(self.invocation(["-l"])).await?;
        parse_profile_list(&output.stdout)
    }

    pub async fn find_profile(&self, name: &str) -> KonsaveResult<Option<Profile>> {
        let profiles = self.list_profiles().await?;
        Ok(find_in(&profiles, name).cloned())
    }

    pub async fn save_profile(&self, name: &str) -> KonsaveResult<()> {
        self.run_checked(self.invocation(["-s", name, "-f"])).await?;
        info!(profile = name, "profile saved");
        Ok(())
    }

    pub async fn apply_profile(&self, name: &str) -> KonsaveResult<()> {
        self.run_checked(self.invocation(["-a", name])).await?;
        info!(profile = name, "profile applied");
        Ok(())
    }

    pub async fn delete_profile(&self, name: &str) -> KonsaveResult<()> {
        self.run_checked(self.invocation(["-r", name])).await?;
        info!(profile = name, "profile deleted");
        Ok(())
    }

    pub async fn import_profile(&self, archive: &Path) -> KonsaveResult<()> {
        let archive_arg = archive.to_string_lossy().into_owned();
        self.run_checked(self.invocation(["-i".to_string(), archive_arg]))
            .await?;
        info!(archive = %archive.display(), "profile imported");
        Ok(())
    }

    /// Runs an export to completion inside `dir`.
    pub async fn export_profile(&self, name: &str, dir: &Path) -> KonsaveResult<()> {
        self.run_checked(self.export_invocation(name, dir)).await?;
        info!(profile = name, dir = %dir.display(), "profile exported");
        Ok(())
    }

    /// Export writes its archive into the process working directory, so the
    /// invocation is pinned to `dir`.
    pub fn export_invocation(&self, name: &str, dir: &Path) -> Invocation {
        self.invocation(["-e", name]).in_dir(dir)
    }

    pub fn spawn_export(&self, name: &str, dir: &Path) -> KonsaveResult<Box<dyn RunningCommand>> {
        self.runner.spawn(&self.export_invocation(name, dir))
    }
}

/// Parses `konsave -l` output. Rows not starting with a numeric ordinal
/// (headers, notices) are skipped; the remaining ordinals must be exactly 1..=N.
pub fn parse_profile_list(stdout: &str) -> KonsaveResult<Vec<Profile>> {
    let mut profiles = Vec::new();
    for line in stdout.lines() {
        let Some((ordinal, name)) = split_row(line) else {
            continue;
        };
        if ordinal.is_empty() || !ordinal.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let ordinal = ordinal.parse::<u32>().map_err(|err| {
            KonsaveError::Integrity(format!("unreadable ordinal '{ordinal}': {err}"))
        })?;
        profiles.push(Profile::new(ordinal, name));
    }

    validate_ordinals(&profiles)?;
    Ok(profiles)
}

/// Tab-separated rows must have exactly two fields; rows without a tab fall
/// back to the first run of whitespace.
fn split_row(line: &str) -> Option<(&str, &str)> {
    if line.contains('\t') {
        let mut fields = line.split('\t');
        let (ordinal, name) = (fields.next()?, fields.next()?);
        if fields.next().is_some() {
            return None;
        }
        return Some((ordinal.trim(), name));
    }
    line.trim().split_once(char::is_whitespace)
}

fn validate_ordinals(profiles: &[Profile]) -> KonsaveResult<()> {
    for (index, profile) in profiles.iter().enumerate() {
        let expected = index as u32 + 1;
        if profile.id.0 != expected {
            return Err(KonsaveError::Integrity(format!(
                "expected ordinal {expected} at row {}, found {} ('{}')",
                index + 1,
                profile.id,
                profile.name
            )));
        }
    }
    Ok(())
}

pub fn find_in<'a>(profiles: &'a [Profile], name: &str) -> Option<&'a Profile> {
    profiles.iter().find(|profile| profile.matches_name(name))
}

pub fn parse_version(stdout: &str) -> Option<String> {
    let pattern = Regex::new(r"(\d+\.\d+\.\d+)").ok()?;
    pattern
        .captures(stdout)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
