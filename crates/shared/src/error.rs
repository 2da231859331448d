use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KonsaveError {
    #[error("`{command}` exited with {}: {diagnostic}", describe_exit(.code))]
    ExternalTool {
        command: String,
        code: Option<i32>,
        diagnostic: String,
    },
    #[error("cannot read all saved profiles from konsave: {0}")]
    Integrity(String),
    #[error("unsupported desktop environment: {0}")]
    UnsupportedEnvironment(String),
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl KonsaveError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Diagnostic text to show the operator; for tool failures this is the tool's own output.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::ExternalTool { diagnostic, .. } => diagnostic.clone(),
            other => other.to_string(),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

pub type KonsaveResult<T> = std::result::Result<T, KonsaveError>;
