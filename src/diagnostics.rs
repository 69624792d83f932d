//! Fire-and-forget diagnostics for host applications
//!
//! The bridge logs through `tracing`; hosts that additionally want to
//! surface status changes or worker stderr in their own UI register a sink
//! callback. Delivery is best-effort and synchronous with the event.

use std::sync::Arc;

use crate::status::ConnectionStatus;

/// Human-readable events forwarded to the host.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    StatusChanged {
        status: ConnectionStatus,
        message: Option<String>,
    },
    StderrLine(String),
}

/// Host-provided callback. Must not block: it runs on bridge tasks.
pub type DiagnosticsSink = Arc<dyn Fn(DiagnosticEvent) + Send + Sync>;
