use std::{
    collections::HashMap,
    fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use konsave_interface::{CommandOutput, CommandRunner, Invocation, KonsaveInterface, RunningCommand};
use shared::error::{KonsaveError, KonsaveResult};
use tokio::time::Instant;

/// Behaviour of a fake `konsave -e` run.
#[derive(Clone)]
pub(crate) struct ExportScript {
    /// Created in the working directory as soon as the process starts; a trailing `/` makes a directory.
    pub artifacts: Vec<&'static str>,
    pub duration: Duration,
    pub exit: CommandOutput,
}

impl ExportScript {
    pub fn succeeds_after(duration: Duration, artifacts: Vec<&'static str>) -> Self {
        Self {
            artifacts,
            duration,
            exit: CommandOutput::success("exported"),
        }
    }

    pub fn fails_after(duration: Duration, stderr: &str) -> Self {
        Self {
            artifacts: Vec::new(),
            duration,
            exit: CommandOutput::failure(1, stderr),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeRunner {
    pub calls: Arc<Mutex<Vec<Invocation>>>,
    pub launched: Arc<Mutex<Vec<Invocation>>>,
    pub terminated: Arc<AtomicBool>,
    outputs: HashMap<String, CommandOutput>,
    /// Files written into the working directory when a matching command runs to completion.
    output_files: HashMap<String, Vec<&'static str>>,
    export: Option<ExportScript>,
}

impl FakeRunner {
    pub fn with_export(mut self, script: ExportScript) -> Self {
        self.export = Some(script);
        self
    }

    pub fn respond(mut self, command_line: &str, output: CommandOutput) -> Self {
        self.outputs.insert(command_line.to_string(), output);
        self
    }

    pub fn creates(mut self, command_line: &str, files: Vec<&'static str>) -> Self {
        self.output_files.insert(command_line.to_string(), files);
        self
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(Invocation::command_line)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn output(&self, invocation: &Invocation) -> KonsaveResult<CommandOutput> {
        self.calls.lock().expect("calls").push(invocation.clone());
        let command_line = invocation.command_line();
        if let (Some(files), Some(dir)) = (self.output_files.get(&command_line), &invocation.current_dir) {
            for file in files {
                fs::write(dir.join(file), b"backup").expect("output file");
            }
        }
        Ok(self
            .outputs
            .get(&command_line)
            .cloned()
            .unwrap_or_else(|| CommandOutput::success("")))
    }

    fn spawn(&self, invocation: &Invocation) -> KonsaveResult<Box<dyn RunningCommand>> {
        self.calls.lock().expect("calls").push(invocation.clone());
        let Some(script) = self.export.clone() else {
            return Err(KonsaveError::Spawn {
                command: invocation.command_line(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no export scripted"),
            });
        };
        if let Some(dir) = &invocation.current_dir {
            for artifact in &script.artifacts {
                if let Some(name) = artifact.strip_suffix('/') {
                    fs::create_dir_all(dir.join(name).join("configs")).expect("artifact dir");
                } else {
                    fs::write(dir.join(artifact), b"partial").expect("artifact file");
                }
            }
        }
        Ok(Box::new(FakeProcess {
            deadline: Instant::now() + script.duration,
            exit: script.exit,
            terminated: Arc::clone(&self.terminated),
        }))
    }

    fn launch(&self, invocation: &Invocation) -> KonsaveResult<()> {
        self.launched.lock().expect("launched").push(invocation.clone());
        Ok(())
    }
}

struct FakeProcess {
    deadline: Instant,
    exit: CommandOutput,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl RunningCommand for FakeProcess {
    async fn wait(&mut self) -> KonsaveResult<CommandOutput> {
        tokio::time::sleep_until(self.deadline).await;
        Ok(self.exit.clone())
    }

    async fn terminate(&mut self) -> KonsaveResult<()> {
        self.terminated.store(true, Ordering::SeqCst);
        self.deadline = Instant::now();
        self.exit = CommandOutput {
            code: None,
            ..CommandOutput::default()
        };
        Ok(())
    }
}

pub(crate) fn konsave_with(runner: FakeRunner) -> (KonsaveInterface, Arc<FakeRunner>) {
    let runner = Arc::new(runner);
    let konsave = KonsaveInterface::new(runner.clone());
    (konsave, runner)
}
