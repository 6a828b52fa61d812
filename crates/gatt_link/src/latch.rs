//! Pending latch
//!
//! Single-slot, cancellable one-shot wait for the completion of the current
//! outstanding GATT operation. Arming a new latch cancels the previous one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

/// How a latch wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchOutcome {
    /// Operation completed successfully
    Released,
    /// Operation completed with an error
    Failed,
    /// Latch was replaced or cancelled
    Cancelled,
    /// No completion within the timeout
    TimedOut,
}

impl LatchOutcome {
    pub fn is_released(self) -> bool {
        self == Self::Released
    }
}

struct Armed {
    id: u64,
    tx: oneshot::Sender<LatchOutcome>,
}

/// Shared latch slot
#[derive(Clone, Default)]
pub struct LatchSlot {
    armed: Arc<Mutex<Option<Armed>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for LatchSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatchSlot")
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl LatchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a new latch, cancelling the one currently armed
    ///
    /// The ticket travels with the command; the pending half is awaited by the caller.
    pub fn arm(&self) -> (PendingLatch, LatchTicket) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self.lock().replace(Armed { id, tx });
        if let Some(prev) = previous {
            let _ = prev.tx.send(LatchOutcome::Cancelled);
        }
        (
            PendingLatch {
                id,
                rx,
                slot: self.clone(),
            },
            LatchTicket {
                id,
                slot: self.clone(),
            },
        )
    }

    /// Cancel the armed latch, if any
    pub fn cancel(&self) {
        if let Some(armed) = self.lock().take() {
            let _ = armed.tx.send(LatchOutcome::Cancelled);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    fn complete(&self, id: u64, outcome: LatchOutcome) -> bool {
        let mut slot = self.lock();
        match slot.as_ref() {
            Some(armed) if armed.id == id => {
                if let Some(armed) = slot.take() {
                    let _ = armed.tx.send(outcome);
                }
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller half of an armed latch
#[derive(Debug)]
pub struct PendingLatch {
    id: u64,
    rx: oneshot::Receiver<LatchOutcome>,
    slot: LatchSlot,
}

impl PendingLatch {
    /// Wait for the operation to complete
    ///
    /// Never errors: a timeout yields `TimedOut` and disarms the latch so a
    /// late completion is ignored.
    pub async fn wait(self, timeout: Duration) -> LatchOutcome {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => LatchOutcome::Cancelled,
            Err(_) => {
                self.slot.complete(self.id, LatchOutcome::TimedOut);
                LatchOutcome::TimedOut
            }
        }
    }
}

/// Completion half of an armed latch, attached to a queued command
#[derive(Debug, Clone)]
pub struct LatchTicket {
    id: u64,
    slot: LatchSlot,
}

impl LatchTicket {
    /// Release the latch if it is still the armed one
    pub fn release(&self, success: bool) -> bool {
        let outcome = if success {
            LatchOutcome::Released
        } else {
            LatchOutcome::Failed
        };
        self.slot.complete(self.id, outcome)
    }
}

/// Wait on a latch and report plain success
///
/// `purpose` labels the wait in logs and metrics (subscribe / unsubscribe / notify_flag).
pub async fn await_latch(latch: PendingLatch, timeout: Duration, purpose: &'static str) -> bool {
    let started = tokio::time::Instant::now();
    let outcome = latch.wait(timeout).await;
    let waited_ms = started.elapsed().as_secs_f64() * 1000.0;
    let label = match outcome {
        LatchOutcome::Released => "released",
        LatchOutcome::Failed => "failed",
        LatchOutcome::Cancelled => "cancelled",
        LatchOutcome::TimedOut => "timed_out",
    };
    observability::record_latch_wait(purpose, label, waited_ms);
    if !outcome.is_released() {
        tracing::debug!(purpose, outcome = label, waited_ms, "latch not released");
    }
    outcome.is_released()
}
