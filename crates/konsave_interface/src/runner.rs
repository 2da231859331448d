//! Narrow command-execution seam between the adapter and the operating system.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use shared::error::{KonsaveError, KonsaveResult};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    pub fn into_checked(self, invocation: &Invocation) -> KonsaveResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(KonsaveError::ExternalTool {
            command: invocation.command_line(),
            code: self.code,
            diagnostic: self.diagnostic(),
        })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn output(&self, invocation: &Invocation) -> KonsaveResult<CommandOutput>;
    fn spawn(&self, invocation: &Invocation) -> KonsaveResult<Box<dyn RunningCommand>>;
    /// Starts a process that must outlive the caller (e.g. a restarted window manager).
    fn launch(&self, invocation: &Invocation) -> KonsaveResult<()>;
}

#[async_trait]
pub trait RunningCommand: Send {
    /// Cancel-safe: dropping the future leaves the process running and a later call resumes.
    async fn wait(&mut self) -> KonsaveResult<CommandOutput>;
    /// Ends the process if it is still alive and reaps it.
    async fn terminate(&mut self) -> KonsaveResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

fn command_for(invocation: &Invocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args).kill_on_drop(true);
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }
    command
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn output(&self, invocation: &Invocation) -> KonsaveResult<CommandOutput> {
        debug!(command = %invocation.command_line(), "running external command");
        let output = command_for(invocation)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| KonsaveError::Spawn {
                command: invocation.command_line(),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, invocation: &Invocation) -> KonsaveResult<Box<dyn RunningCommand>> {
        debug!(command = %invocation.command_line(), "spawning external command");
        let mut child = command_for(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| KonsaveError::Spawn {
                command: invocation.command_line(),
                source,
            })?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        Ok(Box::new(SystemRunningCommand {
            command: invocation.command_line(),
            child,
            stdout,
            stderr,
        }))
    }

    fn launch(&self, invocation: &Invocation) -> KonsaveResult<()> {
        debug!(command = %invocation.command_line(), "launching detached command");
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        command.spawn().map_err(|source| KonsaveError::Spawn {
            command: invocation.command_line(),
            source,
        })?;
        Ok(())
    }
}

fn drain<R>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

struct SystemRunningCommand {
    command: String,
    child: Child,
    stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
    stderr: Option<JoinHandle<io::Result<Vec<u8>>>>,
}

impl SystemRunningCommand {
    async fn collect(
        command: &str,
        slot: &mut Option<JoinHandle<io::Result<Vec<u8>>>>,
    ) -> KonsaveResult<String> {
        let Some(handle) = slot.as_mut() else {
            return Ok(String::new());
        };
        let joined = handle.await;
        *slot = None;
        let bytes = joined
            .map_err(|err| KonsaveError::io(format!("output reader for `{command}`"), io::Error::other(err)))?
            .map_err(|err| KonsaveError::io(format!("failed to read output of `{command}`"), err))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl RunningCommand for SystemRunningCommand {
    async fn wait(&mut self) -> KonsaveResult<CommandOutput> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| KonsaveError::io(format!("failed to wait for `{}`", self.command), err))?;
        let stdout = Self::collect(&self.command, &mut self.stdout).await?;
        let stderr = Self::collect(&self.command, &mut self.stderr).await?;
        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn terminate(&mut self) -> KonsaveResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        debug!(command = %self.command, "terminating external command");
        self.child
            .start_kill()
            .map_err(|err| KonsaveError::io(format!("failed to terminate `{}`", self.command), err))?;
        self.child
            .wait()
            .await
            .map_err(|err| KonsaveError::io(format!("failed to reap `{}`", self.command), err))?;
        Ok(())
    }
}
