//! Correlation table for in-flight requests
//!
//! Maps request ids to pending-result slots. Responses arrive on the stdout
//! reader task while callers register and await on their own tasks, so every
//! operation goes through one mutex over the table. Removal and settlement
//! happen under a single lock acquisition: once a slot is removed, no other
//! path (late response, timeout, drain) can settle it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, Mutex};

use crate::{Error, Result};

/// Final outcome delivered to a waiting caller.
pub type CallOutcome = std::result::Result<JsonValue, Error>;

struct PendingSlot {
    method: String,
    created_at: DateTime<Utc>,
    tx: oneshot::Sender<CallOutcome>,
}

/// The set of calls awaiting a response from the worker.
#[derive(Default)]
pub struct PendingCalls {
    slots: Mutex<HashMap<String, PendingSlot>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a pending slot for `id`, returning the receiver the
    /// caller awaits on.
    pub async fn register(&self, id: &str, method: &str) -> Result<oneshot::Receiver<CallOutcome>> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().await;
        if slots.contains_key(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        slots.insert(
            id.to_string(),
            PendingSlot {
                method: method.to_string(),
                created_at: Utc::now(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Remove the slot for `id` and resolve it with `outcome`.
    ///
    /// Settling an unknown id is a no-op (the call already timed out or was
    /// drained) and returns false.
    pub async fn settle(&self, id: &str, outcome: CallOutcome) -> bool {
        let slot = self.slots.lock().await.remove(id);
        match slot {
            Some(slot) => {
                // The caller may have dropped its receiver; nothing to do then.
                let _ = slot.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Arm an autonomous failure-settle for `id` unless a response or a
    /// drain removes the slot first. Cancellation is implicit: settling an
    /// already-removed id is a no-op.
    pub fn timeout_after(self: Arc<Self>, id: String, method: String, duration: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let timed_out = self
                .settle(
                    &id,
                    Err(Error::Timeout {
                        method: method.clone(),
                        duration,
                    }),
                )
                .await;
            if timed_out {
                tracing::warn!("Request '{}' ({}) timed out after {:?}", method, id, duration);
            }
        });
    }

    /// Fail every remaining slot with `Error::Closed` and clear the table.
    /// Used on stop() and on unexpected worker exit; fine to call when empty.
    pub async fn drain_all(&self, reason: &str) {
        let drained: Vec<(String, PendingSlot)> = self.slots.lock().await.drain().collect();
        for (id, slot) in drained {
            tracing::debug!(
                "Dropping pending call '{}' ({}, issued {})",
                slot.method,
                id,
                slot.created_at
            );
            let _ = slot.tx.send(Err(Error::Closed {
                reason: reason.to_string(),
            }));
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_settle_resolves_registered_call() {
        let pending = PendingCalls::new();
        let rx = pending.register("id1", "add").await.unwrap();

        assert!(pending.settle("id1", Ok(json!(12))).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!(12));
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let pending = PendingCalls::new();
        let _rx = pending.register("id1", "add").await.unwrap();

        let err = pending.register("id1", "add").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "id1"));
        assert_eq!(pending.len().await, 1);
    }

    #[tokio::test]
    async fn test_settle_unknown_id_is_noop() {
        let pending = PendingCalls::new();
        assert!(!pending.settle("nope", Ok(json!(null))).await);
    }

    #[tokio::test]
    async fn test_timeout_settles_call_and_late_response_is_dropped() {
        let pending = Arc::new(PendingCalls::new());
        let rx = pending.register("id1", "slow").await.unwrap();

        Arc::clone(&pending).timeout_after(
            "id1".to_string(),
            "slow".to_string(),
            Duration::from_millis(20),
        );

        let outcome = rx.await.unwrap();
        match outcome {
            Err(Error::Timeout { method, .. }) => assert_eq!(method, "slow"),
            other => panic!("expected timeout, got {:?}", other),
        }

        // A response arriving after the timeout finds no slot.
        assert!(!pending.settle("id1", Ok(json!(1))).await);
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn test_response_beats_timeout() {
        let pending = Arc::new(PendingCalls::new());
        let rx = pending.register("id1", "fast").await.unwrap();

        Arc::clone(&pending).timeout_after(
            "id1".to_string(),
            "fast".to_string(),
            Duration::from_secs(30),
        );

        assert!(pending.settle("id1", Ok(json!("ok"))).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_drain_all_fails_everything_uniformly() {
        let pending = PendingCalls::new();
        let mut receivers = Vec::new();
        for i in 0..3 {
            receivers.push(pending.register(&format!("id{}", i), "m").await.unwrap());
        }

        pending.drain_all("bridge stopped").await;
        assert_eq!(pending.len().await, 0);

        for rx in receivers {
            match rx.await.unwrap() {
                Err(Error::Closed { reason }) => assert_eq!(reason, "bridge stopped"),
                other => panic!("expected closed, got {:?}", other),
            }
        }

        // Draining an empty table is fine.
        pending.drain_all("again").await;
    }

    #[tokio::test]
    async fn test_out_of_order_settlement_matches_by_id() {
        let pending = PendingCalls::new();
        let mut receivers = Vec::new();
        for i in 0..32 {
            receivers.push((i, pending.register(&format!("id{}", i), "m").await.unwrap()));
        }

        // Responses arrive in reverse of issue order.
        for i in (0..32).rev() {
            assert!(pending.settle(&format!("id{}", i), Ok(json!(i))).await);
        }

        for (i, rx) in receivers {
            assert_eq!(rx.await.unwrap().unwrap(), json!(i));
        }
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_settle_exactly_once() {
        let pending = Arc::new(PendingCalls::new());

        let mut waiters = Vec::new();
        for i in 0..16 {
            let rx = pending.register(&format!("id{}", i), "m").await.unwrap();
            waiters.push(tokio::spawn(async move { (i, rx.await.unwrap()) }));
        }

        let mut settlers = Vec::new();
        for i in 0..16 {
            let pending = Arc::clone(&pending);
            settlers.push(tokio::spawn(async move {
                pending.settle(&format!("id{}", i), Ok(json!(i * 10))).await
            }));
        }
        for settler in settlers {
            assert!(settler.await.unwrap());
        }

        for waiter in waiters {
            let (i, outcome) = waiter.await.unwrap();
            assert_eq!(outcome.unwrap(), json!(i * 10));
        }
    }
}
