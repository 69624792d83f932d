//! kx-bridge - drive functions in a long-lived worker process
//!
//! A host application spawns a worker (typically an interpreter running a
//! function-registry server) and calls its functions over line-delimited
//! JSON-RPC 2.0 on the worker's stdio. The bridge supervises the process,
//! correlates concurrent in-flight calls to their responses, tracks the
//! connection state, and bounds every wait with a timeout.
//!
//! ```no_run
//! use kx_bridge::{Bridge, BridgeConfig, SearchPathLocator, TokioProcessAdapter};
//! use serde_json::{json, Map};
//!
//! # async fn run() -> kx_bridge::Result<()> {
//! let locator = SearchPathLocator::new("python3").with_script("worker/server.py");
//! let bridge = Bridge::new(locator, TokioProcessAdapter, BridgeConfig::default());
//!
//! bridge.start().await?;
//! let params: Map<_, _> = json!({"a": 5, "b": 7}).as_object().unwrap().clone();
//! let sum = bridge.call("add", params).await?;
//! bridge.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod locator;
pub mod pending;
pub mod protocol;
pub mod status;
pub mod supervisor;

mod error;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink};
pub use error::{Error, Result};
pub use locator::{FixedCommand, SearchPathLocator, WorkerLocator};
pub use status::{ConnectionStatus, StatusChange};
pub use supervisor::{ProcessAdapter, TokioProcessAdapter, WorkerCommand, WorkerExit};
