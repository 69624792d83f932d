//! Bridge facade
//!
//! Orchestrates one spawn-to-stop worker session: start() resolves and
//! spawns the worker, wires its stdio to the codec and correlation table,
//! probes connectivity, and promotes to Connected; call() is the typed
//! entrypoint for the host; stop() drains in-flight work and tears the
//! process down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::locator::WorkerLocator;
use crate::pending::PendingCalls;
use crate::protocol::{self, Decoded, Request};
use crate::status::{ConnectionStatus, StatusCell, StatusChange};
use crate::supervisor::{ProcessAdapter, StdinWriter};
use crate::{Error, Result};

/// One parent-to-worker JSON-RPC channel with explicit lifecycle.
///
/// Owned by the host and shared by reference (wrap in `Arc` for parallel
/// callers); there is deliberately no global instance.
pub struct Bridge {
    config: BridgeConfig,
    locator: Box<dyn WorkerLocator>,
    adapter: Box<dyn ProcessAdapter>,
    status: Arc<StatusCell>,
    pending: Arc<PendingCalls>,
    session: Mutex<Option<Session>>,
    sink: Option<DiagnosticsSink>,
}

/// Live resources of one spawned worker.
struct Session {
    writer: Arc<StdinWriter>,
    kill: mpsc::Sender<()>,
    /// Set before a deliberate teardown so the exit monitor stays quiet.
    closing: Arc<AtomicBool>,
    stderr_tail: Arc<parking_lot::Mutex<VecDeque<String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    pub fn new(
        locator: impl WorkerLocator + 'static,
        adapter: impl ProcessAdapter + 'static,
        config: BridgeConfig,
    ) -> Self {
        Self {
            config,
            locator: Box::new(locator),
            adapter: Box::new(adapter),
            status: Arc::new(StatusCell::new()),
            pending: Arc::new(PendingCalls::new()),
            session: Mutex::new(None),
            sink: None,
        }
    }

    /// Register a fire-and-forget sink for status changes and stderr lines.
    pub fn with_diagnostics(mut self, sink: DiagnosticsSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.current()
    }

    /// Subscribe to future status transitions. The current value is not
    /// replayed; query [`Bridge::status`] for it.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.status.subscribe()
    }

    /// Spawn the worker and probe connectivity. No-op success when already
    /// Connected. On any failure the process is torn down, the status moves
    /// to Error with the full diagnostic, and the error is returned.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.session.lock().await;

        if guard.is_some() && self.status.current() == ConnectionStatus::Connected {
            tracing::debug!("start() while connected is a no-op");
            return Ok(());
        }

        // A previous session may linger after an error; clear it first.
        if let Some(stale) = guard.take() {
            self.teardown(stale, "restarting").await;
        }

        self.emit(self.status.begin_connecting());

        let command = match self.locator.locate() {
            Ok(command) => command,
            Err(err) => {
                self.emit(self.status.fail(&err.to_string()));
                return Err(err);
            }
        };

        let worker = match self.adapter.spawn(&command) {
            Ok(worker) => worker,
            Err(err) => {
                self.emit(self.status.fail(&err.to_string()));
                return Err(err);
            }
        };

        let closing = Arc::new(AtomicBool::new(false));
        let stderr_tail = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        let writer = Arc::new(StdinWriter::new(worker.stdin));
        let mut tasks = Vec::new();

        // Stdout: decode replies and settle the matching pending calls.
        {
            let pending = Arc::clone(&self.pending);
            let mut lines = BufReader::new(worker.stdout).lines();
            tasks.push(tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    match protocol::decode(&line) {
                        Decoded::Blank => {}
                        Decoded::Failure(failure) => {
                            tracing::warn!(
                                "Skipping malformed worker line ({}): {}",
                                failure.reason,
                                failure.line
                            );
                        }
                        Decoded::Reply(reply) => {
                            let Some(id) = reply.id else {
                                if let Some(fault) = reply.error {
                                    tracing::warn!(
                                        "Worker error without request id ({}): {}",
                                        fault.code,
                                        fault.message
                                    );
                                }
                                continue;
                            };
                            let outcome = match reply.error {
                                Some(fault) => Err(Error::Remote {
                                    code: fault.code,
                                    message: fault.message,
                                    data: fault.data,
                                }),
                                None => Ok(reply.result.unwrap_or(JsonValue::Null)),
                            };
                            if !pending.settle(&id, outcome).await {
                                tracing::debug!("Dropping response for unknown id {}", id);
                            }
                        }
                    }
                }
                tracing::debug!("Worker stdout closed");
            }));
        }

        // Stderr: keep a bounded tail for crash diagnostics, forward to the
        // host sink.
        {
            let tail = Arc::clone(&stderr_tail);
            let sink = self.sink.clone();
            let limit = self.config.stderr_tail;
            let mut lines = BufReader::new(worker.stderr).lines();
            tasks.push(tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("Worker stderr: {}", line);
                    {
                        let mut tail = tail.lock();
                        tail.push_back(line.clone());
                        while tail.len() > limit {
                            tail.pop_front();
                        }
                    }
                    if let Some(sink) = &sink {
                        (sink)(DiagnosticEvent::StderrLine(line));
                    }
                }
            }));
        }

        // Exit monitor: silent after stop(), fatal otherwise.
        {
            let status = Arc::clone(&self.status);
            let pending = Arc::clone(&self.pending);
            let closing = Arc::clone(&closing);
            let tail = Arc::clone(&stderr_tail);
            let sink = self.sink.clone();
            let exit = worker.exit;
            tasks.push(tokio::spawn(async move {
                let Ok(exit) = exit.await else { return };
                if closing.load(Ordering::SeqCst) {
                    tracing::debug!("Worker exited after teardown: {}", exit);
                    return;
                }
                if !matches!(
                    status.current(),
                    ConnectionStatus::Connecting | ConnectionStatus::Connected
                ) {
                    return;
                }

                let stderr_tail: Vec<String> = tail.lock().iter().cloned().collect();
                let err = Error::UnexpectedExit {
                    exit: exit.to_string(),
                    stderr_tail: stderr_tail.clone(),
                };
                let mut message = err.to_string();
                if !stderr_tail.is_empty() {
                    message.push_str(": ");
                    message.push_str(&stderr_tail.join(" | "));
                }
                tracing::error!("{}", message);

                emit_change(&sink, status.fail(&message));
                pending.drain_all(&message).await;
            }));
        }

        *guard = Some(Session {
            writer: Arc::clone(&writer),
            kill: worker.kill,
            closing,
            stderr_tail: Arc::clone(&stderr_tail),
            tasks,
        });

        tokio::time::sleep(self.config.startup_delay).await;

        // The probe is the only call permitted while Connecting.
        let probe = self
            .issue_call(
                &writer,
                &self.config.probe_method,
                Map::new(),
                self.config.probe_timeout,
            )
            .await;

        match probe {
            Ok(_) => {
                self.emit(self.status.mark_connected());
                tracing::info!("Bridge connected (probe '{}' ok)", self.config.probe_method);
                Ok(())
            }
            Err(err) => {
                let recent: Vec<String> = stderr_tail.lock().iter().cloned().collect();
                let mut message = format!("Probe '{}' failed: {}", self.config.probe_method, err);
                if !recent.is_empty() {
                    message.push_str(" (recent stderr: ");
                    message.push_str(&recent.join(" | "));
                    message.push(')');
                }

                if let Some(session) = guard.take() {
                    self.teardown(session, &message).await;
                }
                self.emit(self.status.fail(&message));
                tracing::error!("{}", message);
                Err(err)
            }
        }
    }

    /// Issue a call against the connected worker and await its settlement.
    pub async fn call(&self, method: &str, params: Map<String, JsonValue>) -> Result<JsonValue> {
        if self.status.current() != ConnectionStatus::Connected {
            return Err(Error::NotConnected);
        }

        let writer = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => Arc::clone(&session.writer),
                None => return Err(Error::NotConnected),
            }
        };

        self.issue_call(&writer, method, params, self.config.call_timeout)
            .await
    }

    /// [`Bridge::call`] with the result deserialized into `R`.
    pub async fn call_typed<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Map<String, JsonValue>,
    ) -> Result<R> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Drain pending calls, kill the worker, return to Disconnected. Safe
    /// to call repeatedly or before start().
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            self.teardown(session, "bridge stopped").await;
            tracing::info!("Bridge stopped");
        }
        self.emit(self.status.reset());
    }

    async fn issue_call(
        &self,
        writer: &StdinWriter,
        method: &str,
        params: Map<String, JsonValue>,
        timeout: Duration,
    ) -> Result<JsonValue> {
        let id = next_request_id();
        let request = Request::new(method, params, &id);
        let line = protocol::encode(&request)?;

        let rx = self.pending.register(&id, method).await?;
        Arc::clone(&self.pending).timeout_after(id.clone(), method.to_string(), timeout);

        tracing::debug!("-> {} ({})", method, id);
        if let Err(err) = writer.write_line(&line).await {
            // A dead stdin ends the session, not just this call.
            let message = err.to_string();
            self.emit(self.status.fail(&message));
            self.pending.settle(&id, Err(err)).await;
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Closed {
                reason: "result channel dropped".to_string(),
            }),
        }
    }

    async fn teardown(&self, mut session: Session, reason: &str) {
        session.closing.store(true, Ordering::SeqCst);
        self.pending.drain_all(reason).await;
        let _ = session.kill.try_send(());
        for task in session.tasks.drain(..) {
            task.abort();
        }
        session.stderr_tail.lock().clear();
    }

    fn emit(&self, change: Option<StatusChange>) {
        emit_change(&self.sink, change);
    }
}

fn emit_change(sink: &Option<DiagnosticsSink>, change: Option<StatusChange>) {
    if let (Some(sink), Some(change)) = (sink, change) {
        (sink)(DiagnosticEvent::StatusChanged {
            status: change.status,
            message: change.message,
        });
    }
}

/// Globally unique within a session: millisecond timestamp plus a random
/// suffix. Collisions are guarded in the correlation table regardless.
fn next_request_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", millis, &suffix[..8])
}
