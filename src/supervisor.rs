//! Worker process supervision
//!
//! Owns exactly one child-process instance per bridge session: spawn, the
//! serialized stdin writer, raw stdout/stderr streams, a terminal exit
//! event, and best-effort kill. The bridge facade wires the streams to the
//! codec and the correlation table.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::{Error, Result};

/// Resolved launch instructions, produced by a [`WorkerLocator`].
///
/// [`WorkerLocator`]: crate::locator::WorkerLocator
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// How the worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// A spawned worker's I/O surfaces, abstracted so tests can substitute
/// in-memory pipes for a real child process.
pub struct SpawnedWorker {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,

    /// Fires exactly once when the worker terminates.
    pub exit: oneshot::Receiver<WorkerExit>,

    /// Best-effort termination. Idempotent: sending after exit is harmless.
    pub kill: mpsc::Sender<()>,
}

/// The abstract child-process handle the bridge is built against.
pub trait ProcessAdapter: Send + Sync {
    fn spawn(&self, command: &WorkerCommand) -> Result<SpawnedWorker>;
}

/// Real adapter over `tokio::process`.
pub struct TokioProcessAdapter;

impl ProcessAdapter for TokioProcessAdapter {
    fn spawn(&self, command: &WorkerCommand) -> Result<SpawnedWorker> {
        tracing::info!(
            "Spawning worker: {:?} {:?}",
            command.program,
            command.args
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("{:?}: {}", command.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("Failed to capture stderr".to_string()))?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        // Monitor task: serves kill requests and reaps the child. The kill
        // channel closing (all senders dropped) also terminates the worker,
        // matching kill_on_drop.
        tokio::spawn(async move {
            let status = tokio::select! {
                _ = kill_rx.recv() => {
                    tracing::debug!("Kill requested, terminating worker");
                    child.kill().await.ok();
                    child.wait().await
                }
                status = child.wait() => status,
            };

            let exit = match status {
                Ok(status) => WorkerExit::from_status(status),
                Err(e) => {
                    tracing::warn!("Failed to reap worker: {}", e);
                    WorkerExit {
                        code: None,
                        signal: None,
                    }
                }
            };
            tracing::debug!("Worker terminated: {}", exit);
            let _ = exit_tx.send(exit);
        });

        Ok(SpawnedWorker {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: exit_rx,
            kill: kill_tx,
        })
    }
}

/// Serializes concurrent writers onto the worker's stdin so two parallel
/// calls can never interleave partial lines.
pub struct StdinWriter {
    stdin: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StdinWriter {
    pub fn new(stdin: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            stdin: Mutex::new(stdin),
        }
    }

    /// Append one framed line and flush before the lock releases.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| Error::Write(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Write(e.to_string()))?;
        Ok(())
    }
}
