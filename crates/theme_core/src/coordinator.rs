//! Foreground bookkeeping for in-flight exports and imports.
//!
//! The coordinator is owned by the foreground loop and mutated only through
//! `&mut self`; tasks report back exclusively through [`TaskEvent`]s.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use konsave_interface::KonsaveInterface;
use shared::{
    domain::{normalize_name, Profile, TaskId},
    events::{ExportEvent, TaskEvent, TaskEventKind},
};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    export::{ExportControl, ExportOptions, ExportTask},
    import::ImportTask,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowState {
    #[default]
    Idle,
    Exporting,
    Cancelling,
}

/// What pressing a row's export control did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDispatch {
    Started(TaskId),
    CancelRequested(TaskId),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownDecision {
    Proceed,
    ConfirmRequired {
        exports: Vec<String>,
        imports: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cancelled: usize,
    pub aborted: usize,
    /// Events still queued when shutdown began, in arrival order. Tasks that
    /// finished before the cancel report their real outcome here.
    pub events: Vec<TaskEvent>,
}

struct ActiveExport {
    control: ExportControl,
    row: RowState,
    progress: u8,
}

pub struct TaskCoordinator {
    konsave: KonsaveInterface,
    options: ExportOptions,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    events_rx: mpsc::UnboundedReceiver<TaskEvent>,
    exports: HashMap<String, ActiveExport>,
    imports: HashMap<PathBuf, TaskId>,
    tasks: JoinSet<()>,
}

impl TaskCoordinator {
    pub fn new(konsave: KonsaveInterface, options: ExportOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            konsave,
            options,
            events_tx,
            events_rx,
            exports: HashMap::new(),
            imports: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    pub fn row_state(&self, theme: &str) -> RowState {
        self.exports
            .get(&normalize_name(theme))
            .map_or(RowState::Idle, |export| export.row)
    }

    pub fn progress(&self, theme: &str) -> u8 {
        self.exports
            .get(&normalize_name(theme))
            .map_or(0, |export| export.progress)
    }

    pub fn active_exports(&self) -> Vec<String> {
        let mut themes: Vec<String> = self
            .exports
            .values()
            .map(|export| export.control.theme().to_string())
            .collect();
        themes.sort();
        themes
    }

    pub fn active_imports(&self) -> Vec<PathBuf> {
        let mut archives: Vec<PathBuf> = self.imports.keys().cloned().collect();
        archives.sort();
        archives
    }

    pub fn has_active(&self) -> bool {
        !self.exports.is_empty() || !self.imports.is_empty()
    }

    /// Starts an export for an idle row; `None` if the row already has one.
    pub fn start_export(&mut self, theme: &str) -> Option<TaskId> {
        let key = normalize_name(theme);
        if self.exports.contains_key(&key) {
            return None;
        }
        let task = ExportTask::new(
            theme.trim(),
            self.konsave.clone(),
            self.options.clone(),
            self.events_tx.clone(),
        );
        let control = task.control();
        let id = task.id();
        self.tasks.spawn(async move {
            task.run().await;
        });
        self.exports.insert(
            key,
            ActiveExport {
                control,
                row: RowState::Exporting,
                progress: 0,
            },
        );
        Some(id)
    }

    pub fn cancel_export(&mut self, theme: &str) -> Option<TaskId> {
        let export = self.exports.get_mut(&normalize_name(theme))?;
        if export.row != RowState::Exporting || !export.control.cancel() {
            return None;
        }
        export.row = RowState::Cancelling;
        Some(export.control.id())
    }

    /// Single entry point for a row's export control: start when idle, cancel
    /// while exporting, nothing while a cancel is in progress.
    pub fn press_export(&mut self, theme: &str) -> RowDispatch {
        match self.row_state(theme) {
            RowState::Idle => self
                .start_export(theme)
                .map_or(RowDispatch::Ignored, RowDispatch::Started),
            RowState::Exporting => self
                .cancel_export(theme)
                .map_or(RowDispatch::Ignored, RowDispatch::CancelRequested),
            RowState::Cancelling => RowDispatch::Ignored,
        }
    }

    pub fn start_import(&mut self, archive: &Path) -> Option<TaskId> {
        if self.imports.contains_key(archive) {
            return None;
        }
        let task = ImportTask::new(archive, self.konsave.clone(), self.events_tx.clone());
        Some(self.track_import(task))
    }

    /// Import that overwrites `existing`; its backup is staged in the export directory.
    pub fn start_replacing_import(&mut self, archive: &Path, existing: Profile) -> Option<TaskId> {
        if self.imports.contains_key(archive) {
            return None;
        }
        let task = ImportTask::new(archive, self.konsave.clone(), self.events_tx.clone())
            .replacing(existing, &self.options.export_dir);
        Some(self.track_import(task))
    }

    fn track_import(&mut self, task: ImportTask) -> TaskId {
        let id = task.id();
        let archive = task.archive().to_path_buf();
        self.tasks.spawn(async move {
            task.run().await;
        });
        self.imports.insert(archive, id);
        id
    }

    /// Next event from any task, or `None` once nothing is in flight.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        if let Ok(event) = self.events_rx.try_recv() {
            return Some(event);
        }
        if !self.has_active() {
            return None;
        }
        self.events_rx.recv().await
    }

    /// Folds one event into row state. Returns `false` for events about tasks
    /// the coordinator no longer tracks.
    pub fn apply_event(&mut self, event: &TaskEvent) -> bool {
        let applied = match &event.kind {
            TaskEventKind::Export { theme, event: export_event } => {
                self.apply_export_event(event.task_id, theme, export_event)
            }
            TaskEventKind::Import { source, .. } => {
                let tracked = self.imports.get(source) == Some(&event.task_id);
                if tracked {
                    self.imports.remove(source);
                }
                tracked
            }
        };
        if event.is_terminal() {
            self.reap_finished();
        }
        applied
    }

    fn apply_export_event(&mut self, task_id: TaskId, theme: &str, event: &ExportEvent) -> bool {
        let key = normalize_name(theme);
        let Some(export) = self.exports.get_mut(&key) else {
            debug!(%task_id, theme, "dropping event for untracked export");
            return false;
        };
        if export.control.id() != task_id {
            debug!(%task_id, theme, "dropping event from superseded export");
            return false;
        }
        match event {
            ExportEvent::Progress(value) => {
                export.progress = export.progress.max(*value);
            }
            ExportEvent::Completed { .. } | ExportEvent::Failed(_) | ExportEvent::Cancelled => {
                self.exports.remove(&key);
            }
        }
        true
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(err) = joined {
                warn!("background task ended abnormally: {err}");
            }
        }
    }

    pub fn shutdown_request(&self) -> ShutdownDecision {
        if !self.has_active() {
            return ShutdownDecision::Proceed;
        }
        ShutdownDecision::ConfirmRequired {
            exports: self.active_exports(),
            imports: self.active_imports(),
        }
    }

    /// Waits for background units still finishing (e.g. cancel cleanup) after
    /// every row has reached a terminal event. Returns `false` on timeout.
    pub async fn wait_idle(&mut self, timeout: Duration) -> bool {
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!("background task ended abnormally: {err}");
                }
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(remaining = self.tasks.len(), "background tasks still running after {timeout:?}");
        }
        drained
    }

    /// Operator-confirmed shutdown: cancels every export (each cleans up its
    /// own artifacts), then joins all tasks within `timeout`. Units still
    /// running afterwards are aborted. Events not yet consumed are folded in
    /// and handed back in the report.
    pub async fn force_shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for export in self.exports.values_mut() {
            if export.control.cancel() {
                export.row = RowState::Cancelling;
                report.cancelled += 1;
            }
        }
        info!(cancelled = report.cancelled, imports = self.imports.len(), "forcing shutdown");

        if !self.wait_idle(timeout).await {
            report.aborted = self.tasks.len();
            self.tasks.shutdown().await;
        }

        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply_event(&event) {
                report.events.push(event);
            }
        }
        self.exports.clear();
        self.imports.clear();
        report
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
