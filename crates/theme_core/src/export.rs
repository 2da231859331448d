//! Background export of one profile with synthetic progress and cooperative cancellation.

use std::path::{Path, PathBuf};

use konsave_interface::{CommandOutput, KonsaveInterface, RunningCommand};
use shared::{
    domain::{ExportScope, ExportState, TaskId},
    error::{KonsaveError, KonsaveResult},
    events::{ExportEvent, TaskEvent},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    progress::{ProgressSchedule, PROGRESS_CEILING, PROGRESS_DONE},
    workdir::{self, Snapshot},
};

const STAGING_PREFIX: &str = ".konui-export-";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub export_dir: PathBuf,
    pub scope: ExportScope,
    pub schedule: ProgressSchedule,
}

impl ExportOptions {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
            scope: ExportScope::default(),
            schedule: ProgressSchedule::default(),
        }
    }

    pub fn with_scope(mut self, scope: ExportScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_schedule(mut self, schedule: ProgressSchedule) -> Self {
        self.schedule = schedule;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed(Vec<PathBuf>),
    Failed(String),
    Cancelled,
}

impl ExportOutcome {
    pub fn state(&self) -> ExportState {
        match self {
            Self::Completed(_) => ExportState::Completed,
            Self::Failed(_) => ExportState::Failed,
            Self::Cancelled => ExportState::Cancelled,
        }
    }
}

enum Exit {
    Finished(KonsaveResult<CommandOutput>),
    Cancelled,
}

pub struct ExportTask {
    id: TaskId,
    theme: String,
    konsave: KonsaveInterface,
    options: ExportOptions,
    events: mpsc::UnboundedSender<TaskEvent>,
    cancel: CancelToken,
    state: watch::Sender<ExportState>,
}

impl ExportTask {
    pub fn new(
        theme: impl Into<String>,
        konsave: KonsaveInterface,
        options: ExportOptions,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ExportState::Idle);
        Self {
            id: TaskId::new(),
            theme: theme.into(),
            konsave,
            options,
            events,
            cancel: CancelToken::new(),
            state,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn control(&self) -> ExportControl {
        ExportControl {
            id: self.id,
            theme: self.theme.clone(),
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn spawn(self) -> ExportHandle {
        let control = self.control();
        let join = tokio::spawn(self.run());
        ExportHandle { control, join }
    }

    pub async fn run(self) -> ExportOutcome {
        self.state.send_replace(ExportState::Running);
        info!(task_id = %self.id, theme = %self.theme, "export started");

        let run_dir = self.run_dir();
        let outcome = match self.drive(&run_dir).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = err.to_string();
                self.emit(ExportEvent::Failed(message.clone()));
                ExportOutcome::Failed(message)
            }
        };

        if let ExportOutcome::Failed(reason) = &outcome {
            warn!(task_id = %self.id, theme = %self.theme, "export failed: {reason}");
            if self.options.scope == ExportScope::Isolated {
                workdir::remove_dir_best_effort(&run_dir).await;
            }
        } else {
            info!(task_id = %self.id, theme = %self.theme, state = ?outcome.state(), "export finished");
        }

        self.state.send_replace(outcome.state());
        outcome
    }

    fn run_dir(&self) -> PathBuf {
        match self.options.scope {
            ExportScope::Shared => self.options.export_dir.clone(),
            ExportScope::Isolated => self
                .options
                .export_dir
                .join(format!("{STAGING_PREFIX}{}", self.id)),
        }
    }

    /// Emits every event of the task except a failure surfaced as `Err`.
    async fn drive(&self, run_dir: &Path) -> KonsaveResult<ExportOutcome> {
        if self.cancel.is_cancelled() {
            self.emit(ExportEvent::Cancelled);
            return Ok(ExportOutcome::Cancelled);
        }

        if self.options.scope == ExportScope::Isolated {
            tokio::fs::create_dir_all(run_dir).await.map_err(|err| {
                KonsaveError::io(
                    format!("failed to create staging directory '{}'", run_dir.display()),
                    err,
                )
            })?;
        }
        let before = workdir::snapshot(run_dir).await?;
        let mut process = self.konsave.spawn_export(&self.theme, run_dir)?;

        let mut progress: u8 = 0;
        let exit = loop {
            let delay = self.options.schedule.delay_after(progress);
            tokio::select! {
                biased;
                output = process.wait() => break Exit::Finished(output),
                _ = self.cancel.cancelled() => break Exit::Cancelled,
                _ = tokio::time::sleep(delay), if progress < PROGRESS_CEILING => {
                    progress += 1;
                    self.emit(ExportEvent::Progress(progress));
                }
            }
        };

        match exit {
            Exit::Cancelled => Ok(self.finish_cancelled(process.as_mut(), run_dir, &before).await),
            Exit::Finished(output) => {
                let output = output?;
                if !output.is_success() {
                    let diagnostic = output.diagnostic();
                    self.emit(ExportEvent::Failed(diagnostic.clone()));
                    return Ok(ExportOutcome::Failed(diagnostic));
                }
                let artifacts = self.collect_artifacts(run_dir, &before).await?;
                self.emit(ExportEvent::Progress(PROGRESS_DONE));
                self.emit(ExportEvent::Completed {
                    artifacts: artifacts.clone(),
                });
                Ok(ExportOutcome::Completed(artifacts))
            }
        }
    }

    async fn finish_cancelled(
        &self,
        process: &mut dyn RunningCommand,
        run_dir: &Path,
        before: &Snapshot,
    ) -> ExportOutcome {
        if let Err(err) = process.terminate().await {
            warn!(task_id = %self.id, "failed to terminate export process: {err}");
        }
        self.emit(ExportEvent::Cancelled);

        let report = workdir::remove_created(run_dir, before).await;
        if self.options.scope == ExportScope::Isolated {
            workdir::remove_dir_best_effort(run_dir).await;
        }
        info!(
            task_id = %self.id,
            theme = %self.theme,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "export cancelled"
        );
        ExportOutcome::Cancelled
    }

    async fn collect_artifacts(
        &self,
        run_dir: &Path,
        before: &Snapshot,
    ) -> KonsaveResult<Vec<PathBuf>> {
        match self.options.scope {
            ExportScope::Shared => workdir::created_since(run_dir, before).await,
            ExportScope::Isolated => {
                let published = workdir::publish(run_dir, &self.options.export_dir).await?;
                workdir::remove_dir_best_effort(run_dir).await;
                Ok(published)
            }
        }
    }

    fn emit(&self, event: ExportEvent) {
        debug!(task_id = %self.id, ?event, "export event");
        let _ = self
            .events
            .send(TaskEvent::export(self.id, self.theme.clone(), event));
    }
}

/// Observer/cancel side of an export; cheap to clone and safe to keep after the task ends.
#[derive(Debug, Clone)]
pub struct ExportControl {
    id: TaskId,
    theme: String,
    cancel: CancelToken,
    state: watch::Receiver<ExportState>,
}

impl ExportControl {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn state(&self) -> ExportState {
        *self.state.borrow()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Requests cancellation. A task that already reached a terminal state, or
    /// was already asked to cancel, is left alone and `false` is returned.
    pub fn cancel(&self) -> bool {
        if self.state().is_terminal() {
            debug!(task_id = %self.id, "ignoring cancel for finished export");
            return false;
        }
        let requested = self.cancel.cancel();
        if requested {
            info!(task_id = %self.id, theme = %self.theme, "export cancellation requested");
        }
        requested
    }
}

pub struct ExportHandle {
    control: ExportControl,
    join: JoinHandle<ExportOutcome>,
}

impl ExportHandle {
    pub fn control(&self) -> &ExportControl {
        &self.control
    }

    pub fn id(&self) -> TaskId {
        self.control.id()
    }

    pub fn state(&self) -> ExportState {
        self.control.state()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> ExportOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(err) => ExportOutcome::Failed(format!("export task aborted: {err}")),
        }
    }
}

#[cfg(test)]
#[path = "tests/export_tests.rs"]
mod tests;
