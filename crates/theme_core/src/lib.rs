//! Export/import task engine for the konsave front-end.

pub mod cancel;
pub mod coordinator;
pub mod export;
pub mod import;
pub mod naming;
pub mod progress;
pub mod session;
pub mod workdir;

pub use cancel::CancelToken;
pub use coordinator::{RowDispatch, RowState, ShutdownDecision, ShutdownReport, TaskCoordinator};
pub use export::{ExportControl, ExportHandle, ExportOptions, ExportOutcome, ExportTask};
pub use import::{ImportHandle, ImportTask};
pub use naming::{archive_profile_name, validate_profile_name, NameCheck};
pub use progress::ProgressSchedule;
pub use session::{DisplayProtocol, SessionEnvironment, SessionReloader};

#[cfg(test)]
#[path = "tests/support.rs"]
mod tests_support;
