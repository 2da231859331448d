use std::path::{Path, PathBuf};

use konsave_interface::KonsaveInterface;
use shared::{
    domain::{Profile, TaskId},
    error::{KonsaveError, KonsaveResult},
    events::{ImportEvent, TaskEvent},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::workdir::{self, Snapshot};

const BACKUP_PREFIX: &str = ".konui-backup-";

/// Existing profile an import overwrites, and where its backup archive goes.
struct Replacement {
    existing: Profile,
    backup_dir: PathBuf,
}

/// One `konsave -i` run off the foreground. Failures are reported as
/// `ImportEvent::Failed` rather than escaping the task.
pub struct ImportTask {
    id: TaskId,
    archive: PathBuf,
    konsave: KonsaveInterface,
    events: mpsc::UnboundedSender<TaskEvent>,
    replaces: Option<Replacement>,
}

impl ImportTask {
    pub fn new(
        archive: impl Into<PathBuf>,
        konsave: KonsaveInterface,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            archive: archive.into(),
            konsave,
            events,
            replaces: None,
        }
    }

    /// Overwrites `existing`: it is exported under `backup_root` first, removed
    /// right before the import and re-imported from the backup if the import fails.
    pub fn replacing(mut self, existing: Profile, backup_root: &Path) -> Self {
        let backup_dir = backup_root.join(format!("{BACKUP_PREFIX}{}", self.id));
        self.replaces = Some(Replacement {
            existing,
            backup_dir,
        });
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn spawn(self) -> ImportHandle {
        let id = self.id;
        let archive = self.archive.clone();
        let join = tokio::spawn(self.run());
        ImportHandle { id, archive, join }
    }

    pub async fn run(self) -> ImportEvent {
        info!(task_id = %self.id, archive = %self.archive.display(), "import started");
        let result = match &self.replaces {
            Some(replacement) => self.replace(replacement).await,
            None => self
                .konsave
                .import_profile(&self.archive)
                .await
                .map_err(|err| err.to_string()),
        };
        let event = match result {
            Ok(()) => ImportEvent::Finished,
            Err(reason) => {
                warn!(task_id = %self.id, archive = %self.archive.display(), "import failed: {reason}");
                ImportEvent::Failed(reason)
            }
        };
        let _ = self
            .events
            .send(TaskEvent::import(self.id, self.archive.clone(), event.clone()));
        event
    }

    async fn replace(&self, replacement: &Replacement) -> Result<(), String> {
        let Replacement {
            existing,
            backup_dir,
        } = replacement;

        let backup = match self.back_up(existing, backup_dir).await {
            Ok(backup) => backup,
            Err(err) => {
                workdir::remove_dir_best_effort(backup_dir).await;
                return Err(format!(
                    "could not back up profile '{}', left it in place: {err}",
                    existing.name
                ));
            }
        };
        if let Err(err) = self.konsave.delete_profile(&existing.name).await {
            workdir::remove_dir_best_effort(backup_dir).await;
            return Err(format!(
                "could not remove profile '{}' before importing: {err}",
                existing.name
            ));
        }

        let Err(err) = self.konsave.import_profile(&self.archive).await else {
            workdir::remove_dir_best_effort(backup_dir).await;
            return Ok(());
        };
        match self.konsave.import_profile(&backup).await {
            Ok(()) => {
                info!(task_id = %self.id, profile = %existing.name, "previous profile restored");
                workdir::remove_dir_best_effort(backup_dir).await;
                Err(format!("{err}; previous profile '{}' restored", existing.name))
            }
            Err(restore_err) => {
                warn!(task_id = %self.id, backup = %backup.display(), "restoring previous profile failed: {restore_err}");
                Err(format!(
                    "{err}; restoring previous profile '{}' also failed ({restore_err}), backup kept at '{}'",
                    existing.name,
                    backup.display()
                ))
            }
        }
    }

    async fn back_up(&self, existing: &Profile, dir: &Path) -> KonsaveResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await.map_err(|err| {
            KonsaveError::io(
                format!("failed to create backup directory '{}'", dir.display()),
                err,
            )
        })?;
        self.konsave.export_profile(&existing.name, dir).await?;
        let created = workdir::created_since(dir, &Snapshot::new()).await?;
        created
            .iter()
            .find(|path| path.extension().is_some_and(|ext| ext == "knsv"))
            .or_else(|| created.first())
            .cloned()
            .ok_or_else(|| {
                KonsaveError::io(
                    format!("backup of '{}' produced no archive", existing.name),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )
            })
    }
}

pub struct ImportHandle {
    id: TaskId,
    archive: PathBuf,
    join: JoinHandle<ImportEvent>,
}

impl ImportHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub async fn join(self) -> ImportEvent {
        match self.join.await {
            Ok(event) => event,
            Err(err) => ImportEvent::Failed(format!("import task aborted: {err}")),
        }
    }
}

#[cfg(test)]
#[path = "tests/import_tests.rs"]
mod tests;
