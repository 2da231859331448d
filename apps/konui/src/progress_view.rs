//! Terminal rendering of per-task progress rows.

use std::io::{self, IsTerminal, Write};

use shared::{
    domain::TaskId,
    events::{ExportEvent, ImportEvent, TaskEvent, TaskEventKind},
};

const BAR_WIDTH: usize = 30;

pub fn render_progress_bar(progress: u8, width: usize) -> String {
    let progress = progress.min(100) as usize;
    let filled = progress * width / 100;
    format!(
        "[{}{}] {progress:>3}%",
        "#".repeat(filled),
        "-".repeat(width - filled)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Running(u8),
    Done,
    Failed(String),
    Cancelled,
}

impl RowStatus {
    fn is_finished(&self) -> bool {
        !matches!(self, Self::Running(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardSummary {
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

struct Row {
    task_id: TaskId,
    label: String,
    status: RowStatus,
}

/// One line per tracked task. On a terminal the whole board is redrawn in
/// place; otherwise only state changes are printed.
pub struct ProgressBoard {
    rows: Vec<Row>,
    live: bool,
    drawn: usize,
    held: bool,
    deferred: Vec<usize>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::with_live(io::stdout().is_terminal())
    }

    pub fn with_live(live: bool) -> Self {
        Self {
            rows: Vec::new(),
            live,
            drawn: 0,
            held: false,
            deferred: Vec::new(),
        }
    }

    pub fn track(&mut self, task_id: TaskId, label: impl Into<String>) {
        self.rows.push(Row {
            task_id,
            label: label.into(),
            status: RowStatus::Running(0),
        });
        self.redraw();
    }

    pub fn status(&self, task_id: TaskId) -> Option<&RowStatus> {
        self.rows
            .iter()
            .find(|row| row.task_id == task_id)
            .map(|row| &row.status)
    }

    /// Folds an event into its row; returns `true` when the row changed.
    pub fn record(&mut self, event: &TaskEvent) -> bool {
        let Some(index) = self.rows.iter().position(|row| row.task_id == event.task_id) else {
            return false;
        };
        let next = match (&event.kind, &self.rows[index].status) {
            (_, status) if status.is_finished() => return false,
            (TaskEventKind::Export { event, .. }, RowStatus::Running(current)) => match event {
                ExportEvent::Progress(value) if *value <= *current => return false,
                ExportEvent::Progress(value) => RowStatus::Running(*value),
                ExportEvent::Completed { .. } => RowStatus::Done,
                ExportEvent::Failed(reason) => RowStatus::Failed(reason.clone()),
                ExportEvent::Cancelled => RowStatus::Cancelled,
            },
            (TaskEventKind::Import { event, .. }, _) => match event {
                ImportEvent::Finished => RowStatus::Done,
                ImportEvent::Failed(reason) => RowStatus::Failed(reason.clone()),
            },
            _ => return false,
        };
        let finished = next.is_finished();
        self.rows[index].status = next;
        if self.live {
            self.redraw();
        } else if finished && self.held {
            self.deferred.push(index);
        } else if finished {
            println!("{}", self.line(index));
        }
        true
    }

    /// Keeps state current but stops writing to the terminal, so a question
    /// can be asked underneath the board.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Prints what changed while held. A live board is drawn afresh below
    /// the question.
    pub fn resume(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        for index in std::mem::take(&mut self.deferred) {
            println!("{}", self.line(index));
        }
        self.drawn = 0;
        self.redraw();
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Marks rows that never reported a terminal event as cancelled.
    pub fn cancel_unfinished(&mut self) {
        for row in self.rows.iter_mut().filter(|row| !row.status.is_finished()) {
            row.status = RowStatus::Cancelled;
        }
        self.redraw();
    }

    pub fn summary(&self) -> BoardSummary {
        let mut summary = BoardSummary::default();
        for row in &self.rows {
            match row.status {
                RowStatus::Done => summary.done += 1,
                RowStatus::Failed(_) => summary.failed += 1,
                RowStatus::Cancelled => summary.cancelled += 1,
                RowStatus::Running(_) => {}
            }
        }
        summary
    }

    fn line(&self, index: usize) -> String {
        let row = &self.rows[index];
        let width = self
            .rows
            .iter()
            .map(|row| row.label.chars().count())
            .max()
            .unwrap_or(0);
        let detail = match &row.status {
            RowStatus::Running(progress) => render_progress_bar(*progress, BAR_WIDTH),
            RowStatus::Done => "done".to_string(),
            RowStatus::Failed(reason) => format!("failed: {reason}"),
            RowStatus::Cancelled => "cancelled".to_string(),
        };
        format!("{:<width$}  {detail}", row.label)
    }

    fn redraw(&mut self) {
        if !self.live || self.held {
            return;
        }
        let mut out = io::stdout().lock();
        if self.drawn > 0 {
            let _ = write!(out, "\x1b[{}A", self.drawn);
        }
        for index in 0..self.rows.len() {
            let _ = writeln!(out, "\x1b[2K{}", self.line(index));
        }
        let _ = out.flush();
        self.drawn = self.rows.len();
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}
