use std::{
    collections::HashSet,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use konsave_interface::{find_in, CommandRunner, KonsaveInterface};
use shared::domain::{normalize_name, Profile};
use theme_core::{
    archive_profile_name, validate_profile_name, NameCheck, RowDispatch, SessionEnvironment,
    SessionReloader, ShutdownDecision, ShutdownReport, TaskCoordinator,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::Settings,
    progress_view::{BoardSummary, ProgressBoard},
    prompt,
};

pub async fn ensure_installed(konsave: &KonsaveInterface) -> Result<()> {
    if !konsave.is_installed().await {
        bail!(
            "konsave is not installed or not runnable (looked for `{}`)",
            konsave.program()
        );
    }
    Ok(())
}

pub async fn version(konsave: &KonsaveInterface) -> Result<()> {
    let Some(version) = konsave.version().await else {
        bail!("could not determine the konsave version; is `{}` installed?", konsave.program());
    };
    println!("konsave {version}");
    Ok(())
}

pub async fn list(konsave: &KonsaveInterface, json: bool) -> Result<()> {
    let profiles = konsave.list_profiles().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    } else if profiles.is_empty() {
        println!("no saved profiles");
    } else {
        for profile in &profiles {
            println!("{:>3}  {}", profile.id, profile.name);
        }
    }
    Ok(())
}

pub async fn save(konsave: &KonsaveInterface, name: &str, force: bool) -> Result<()> {
    let profiles = konsave.list_profiles().await?;
    let target = save_target(name, &profiles, force)?;
    konsave.save_profile(&target).await?;
    println!("saved profile '{target}'");
    Ok(())
}

/// Name to pass to `konsave -s`. A forced save over a collision reuses the
/// existing profile's spelling so konsave overwrites it.
pub fn save_target(input: &str, profiles: &[Profile], force: bool) -> Result<String> {
    match validate_profile_name(input, profiles) {
        NameCheck::Empty => bail!("profile name must not be empty"),
        NameCheck::Available(name) => Ok(name),
        NameCheck::Collides { existing, .. } if force => Ok(existing.name),
        NameCheck::Collides { requested, existing } => bail!(
            "'{requested}' collides with existing profile '{}'; pass --force to overwrite it",
            existing.name
        ),
    }
}

async fn require_profile(konsave: &KonsaveInterface, name: &str) -> Result<Profile> {
    konsave
        .find_profile(name)
        .await?
        .with_context(|| format!("no saved profile named '{}'", name.trim()))
}

pub async fn apply(konsave: &KonsaveInterface, name: &str, reload: bool) -> Result<()> {
    let profile = require_profile(konsave, name).await?;
    konsave.apply_profile(&profile.name).await?;
    println!("applied profile '{}'", profile.name);
    if reload {
        reload_session(konsave.runner()).await?;
    }
    Ok(())
}

pub async fn delete(konsave: &KonsaveInterface, name: &str, yes: bool) -> Result<()> {
    let profile = require_profile(konsave, name).await?;
    if !yes && !prompt::confirm(format!("Delete profile '{}'?", profile.name)).await? {
        println!("kept profile '{}'", profile.name);
        return Ok(());
    }
    konsave.delete_profile(&profile.name).await?;
    println!("deleted profile '{}'", profile.name);
    Ok(())
}

pub async fn reload_session(runner: Arc<dyn CommandRunner>) -> Result<()> {
    let env = SessionEnvironment::detect(runner.as_ref()).await;
    info!(protocol = %env.protocol, version = %env.shell_version, "reloading desktop session");
    SessionReloader::new(runner)
        .reload(&env)
        .await
        .context("desktop session reload failed")?;
    println!("desktop session reloaded ({} session, Plasma {})", env.protocol, env.shell_version);
    Ok(())
}

pub async fn export(
    konsave: &KonsaveInterface,
    settings: &Settings,
    names: &[String],
    all: bool,
) -> Result<()> {
    let profiles = konsave.list_profiles().await?;
    let targets = export_targets(&profiles, names, all)?;
    if targets.is_empty() {
        println!("no saved profiles to export");
        return Ok(());
    }
    tokio::fs::create_dir_all(&settings.export_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create export directory '{}'",
                settings.export_dir.display()
            )
        })?;

    let mut coordinator = TaskCoordinator::new(konsave.clone(), settings.export_options());
    let mut board = ProgressBoard::new();
    for name in &targets {
        if let RowDispatch::Started(task_id) = coordinator.press_export(name) {
            board.track(task_id, name.as_str());
        }
    }
    let summary = run_tasks(&mut coordinator, &mut board, settings.shutdown_timeout()).await?;
    finish("export", summary)
}

/// Resolves requested names against the listing, keeping konsave's spelling
/// and dropping duplicates.
pub fn export_targets(profiles: &[Profile], names: &[String], all: bool) -> Result<Vec<String>> {
    if all {
        return Ok(profiles.iter().map(|profile| profile.name.clone()).collect());
    }
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for name in names {
        let profile = find_in(profiles, name)
            .with_context(|| format!("no saved profile named '{}'", name.trim()))?;
        if seen.insert(normalize_name(&profile.name)) {
            targets.push(profile.name.clone());
        }
    }
    Ok(targets)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedImport {
    pub archive: PathBuf,
    pub profile_name: String,
    pub replaces: Option<Profile>,
}

pub async fn import(
    konsave: &KonsaveInterface,
    settings: &Settings,
    archives: &[PathBuf],
    overwrite: bool,
) -> Result<()> {
    for archive in archives {
        let metadata = tokio::fs::metadata(archive)
            .await
            .with_context(|| format!("cannot read archive '{}'", archive.display()))?;
        if !metadata.is_file() {
            bail!("'{}' is not a file", archive.display());
        }
    }
    let profiles = konsave.list_profiles().await?;
    let plan = plan_imports(&profiles, archives, overwrite)?;

    let mut coordinator = TaskCoordinator::new(konsave.clone(), settings.export_options());
    let mut board = ProgressBoard::new();
    for planned in &plan {
        let started = match &planned.replaces {
            Some(existing) => {
                info!(profile = %existing.name, archive = %planned.archive.display(), "replacing existing profile");
                coordinator.start_replacing_import(&planned.archive, existing.clone())
            }
            None => coordinator.start_import(&planned.archive),
        };
        if let Some(task_id) = started {
            board.track(task_id, planned.archive.display().to_string());
        }
    }
    let summary = run_tasks(&mut coordinator, &mut board, settings.shutdown_timeout()).await?;
    finish("import", summary)
}

/// Checks each archive's profile name against the listing and the rest of the batch.
pub fn plan_imports(
    profiles: &[Profile],
    archives: &[PathBuf],
    overwrite: bool,
) -> Result<Vec<PlannedImport>> {
    let mut seen = HashSet::new();
    let mut plan = Vec::with_capacity(archives.len());
    for archive in archives {
        let profile_name = archive_profile_name(archive).with_context(|| {
            format!("cannot derive a profile name from '{}'", archive.display())
        })?;
        if !seen.insert(normalize_name(&profile_name)) {
            bail!("more than one archive would import profile '{profile_name}'");
        }
        let replaces = match validate_profile_name(&profile_name, profiles) {
            NameCheck::Collides { existing, .. } if overwrite => Some(existing),
            NameCheck::Collides { existing, .. } => bail!(
                "archive '{}' would replace existing profile '{}'; pass --overwrite to allow it",
                archive.display(),
                existing.name
            ),
            NameCheck::Available(_) | NameCheck::Empty => None,
        };
        plan.push(PlannedImport {
            archive: archive.clone(),
            profile_name,
            replaces,
        });
    }
    Ok(plan)
}

/// Forwards every Ctrl-C press into one channel until dropped.
struct InterruptListener {
    task: JoinHandle<()>,
}

impl InterruptListener {
    fn spawn() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for Ctrl-C: {err}");
                    break;
                }
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        (Self { task }, rx)
    }
}

impl Drop for InterruptListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_tasks(
    coordinator: &mut TaskCoordinator,
    board: &mut ProgressBoard,
    timeout: Duration,
) -> Result<BoardSummary> {
    let (_listener, mut interrupts) = InterruptListener::spawn();
    drive(coordinator, board, timeout, &mut interrupts, prompt::confirm).await
}

/// Pumps task events into the board until every task is done. An interrupt
/// asks whether to terminate the remaining tasks; events keep flowing while
/// the question is open.
async fn drive<C, F>(
    coordinator: &mut TaskCoordinator,
    board: &mut ProgressBoard,
    timeout: Duration,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    confirm: C,
) -> Result<BoardSummary>
where
    C: Fn(String) -> F,
    F: Future<Output = Result<bool>> + Send + 'static,
{
    let mut pending: Option<JoinHandle<Result<bool>>> = None;
    let mut tasks_done = false;
    let mut listening = true;
    loop {
        tokio::select! {
            next = coordinator.next_event(), if !tasks_done => match next {
                Some(event) => {
                    if coordinator.apply_event(&event) {
                        board.record(&event);
                    }
                }
                None if pending.is_none() => break,
                None => tasks_done = true,
            },
            interrupt = interrupts.recv(), if listening && pending.is_none() => match interrupt {
                None => listening = false,
                Some(()) => match coordinator.shutdown_request() {
                    ShutdownDecision::Proceed => break,
                    ShutdownDecision::ConfirmRequired { exports, imports } => {
                        board.hold();
                        pending = Some(tokio::spawn(confirm(shutdown_question(&exports, &imports))));
                    }
                },
            },
            answer = wait_for_answer(&mut pending), if pending.is_some() => {
                pending = None;
                board.resume();
                if answer? {
                    let report = coordinator.force_shutdown(timeout).await;
                    warn!(cancelled = report.cancelled, aborted = report.aborted, "tasks terminated on request");
                    settle_forced(board, &report);
                    return Ok(board.summary());
                }
                info!("keeping active tasks running");
                if tasks_done {
                    break;
                }
            }
        }
    }
    coordinator.wait_idle(timeout).await;
    Ok(board.summary())
}

async fn wait_for_answer(pending: &mut Option<JoinHandle<Result<bool>>>) -> Result<bool> {
    match pending.as_mut() {
        Some(handle) => handle.await.context("confirmation prompt failed")?,
        None => std::future::pending().await,
    }
}

/// Records outcomes that arrived during a forced shutdown, then marks
/// whatever is left as cancelled.
pub fn settle_forced(board: &mut ProgressBoard, report: &ShutdownReport) {
    for event in &report.events {
        board.record(event);
    }
    board.cancel_unfinished();
}

pub fn shutdown_question(exports: &[String], imports: &[PathBuf]) -> String {
    let mut running = Vec::new();
    if !exports.is_empty() {
        running.push(format!("{} export(s) ({})", exports.len(), exports.join(", ")));
    }
    if !imports.is_empty() {
        let names: Vec<String> = imports.iter().map(|path| display_name(path)).collect();
        running.push(format!("{} import(s) ({})", imports.len(), names.join(", ")));
    }
    format!(
        "{} still running. Terminate and exit?",
        running.join(" and ")
    )
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn finish(what: &str, summary: BoardSummary) -> Result<()> {
    println!(
        "{what}: {} done, {} failed, {} cancelled",
        summary.done, summary.failed, summary.cancelled
    );
    if summary.failed > 0 {
        bail!("{} {what}(s) failed", summary.failed);
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
