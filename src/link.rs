//! Link-layer negotiator subprocess.
//!
//! The process is reached only through its stdin and stdout. Each session
//! owns at most one.

use std::io;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::types::{Result, SstpError};

/// A running link process and the write end of its stdin.
#[derive(Debug)]
pub struct LinkProcess {
    child: Child,
    stdin: ChildStdin,
}

impl LinkProcess {
    /// Launch the configured program with piped stdin and stdout.
    ///
    /// The stdout half is returned separately so a reader task can own it.
    pub fn spawn(config: &LinkConfig) -> Result<(Self, ChildStdout)> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(SstpError::SubprocessSpawnFailure)?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        info!(
            "Started link process {} (pid {:?})",
            config.program,
            child.id()
        );
        Ok((Self { child, stdin }, stdout))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write one block to the process stdin.
    ///
    /// A closed pipe means the process is gone and maps to
    /// [`SstpError::SubprocessExited`].
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin.write_all(bytes).await.map_err(pipe_error)?;
        self.stdin.flush().await.map_err(pipe_error)?;
        Ok(())
    }

    /// Kill the process unless it already exited, then reap it.
    pub async fn terminate(mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!("Link process already exited with {}", status);
            return Ok(());
        }

        if let Err(e) = self.child.start_kill() {
            warn!("Failed to signal link process: {}", e);
        }
        let status = self.child.wait().await?;
        debug!("Link process terminated with {}", status);
        Ok(())
    }
}

fn pipe_error(e: io::Error) -> SstpError {
    match e.kind() {
        io::ErrorKind::BrokenPipe => SstpError::SubprocessExited,
        _ => SstpError::Io(e),
    }
}

fn missing_pipe(name: &str) -> SstpError {
    SstpError::SubprocessSpawnFailure(io::Error::new(
        io::ErrorKind::Other,
        format!("link process {} was not captured", name),
    ))
}

/// Lifecycle of a session's link process
#[derive(Debug, Default)]
pub enum LinkState {
    #[default]
    NotStarted,
    Running(LinkProcess),
    Exited,
}

impl LinkState {
    pub fn is_running(&self) -> bool {
        matches!(self, LinkState::Running(_))
    }

    pub fn process_mut(&mut self) -> Option<&mut LinkProcess> {
        match self {
            LinkState::Running(process) => Some(process),
            _ => None,
        }
    }

    /// Terminate the process if one is running.
    ///
    /// Returns whether a process was stopped; calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<bool> {
        match std::mem::replace(self, LinkState::Exited) {
            LinkState::Running(process) => {
                process.terminate().await?;
                Ok(true)
            }
            previous => {
                *self = previous;
                Ok(false)
            }
        }
    }
}
