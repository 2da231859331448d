use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ExportEvent {
    Progress(u8),
    Completed { artifacts: Vec<PathBuf> },
    Failed(String),
    Cancelled,
}

impl ExportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ImportEvent {
    Finished,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventKind {
    Export { theme: String, event: ExportEvent },
    Import { source: PathBuf, event: ImportEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

impl TaskEvent {
    pub fn export(task_id: TaskId, theme: impl Into<String>, event: ExportEvent) -> Self {
        Self {
            task_id,
            kind: TaskEventKind::Export {
                theme: theme.into(),
                event,
            },
        }
    }

    pub fn import(task_id: TaskId, source: impl Into<PathBuf>, event: ImportEvent) -> Self {
        Self {
            task_id,
            kind: TaskEventKind::Import {
                source: source.into(),
                event,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            TaskEventKind::Export { event, .. } => event.is_terminal(),
            TaskEventKind::Import { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn task_event_flattens_kind_next_to_task_id() {
        let id = TaskId::new();
        let event = TaskEvent::export(id, "Dark", ExportEvent::Progress(42));
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({
                "task_id": id.0.to_string(),
                "kind": "export",
                "theme": "Dark",
                "event": { "type": "progress", "payload": 42 },
            })
        );
    }

    #[test]
    fn imports_are_always_terminal() {
        let id = TaskId::new();
        assert!(TaskEvent::import(id, "/tmp/Dark.knsv", ImportEvent::Finished).is_terminal());
        assert!(!TaskEvent::export(id, "Dark", ExportEvent::Progress(99)).is_terminal());
        assert!(TaskEvent::export(id, "Dark", ExportEvent::Cancelled).is_terminal());
    }
}
