use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for scheduled work. Cloning hands out another
/// view of the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A deferred payload due at a point on the session's millisecond clock.
/// The flag is checked before the payload is handed out; cancelled tasks
/// no-op.
#[derive(Debug)]
pub struct ScheduledTask<T> {
    pub due_ms: u64,
    pub cancel: CancelFlag,
    pub payload: T,
}

impl<T> ScheduledTask<T> {
    pub fn new(due_ms: u64, cancel: CancelFlag, payload: T) -> Self {
        Self {
            due_ms,
            cancel,
            payload,
        }
    }

    /// Consume the task if it is due at `now_ms`. Returns None (dropping the
    /// payload) when the task was cancelled in the meantime.
    pub fn fire(self, now_ms: u64) -> FireOutcome<T> {
        if now_ms < self.due_ms {
            return FireOutcome::Pending(self);
        }
        if self.cancel.is_cancelled() {
            return FireOutcome::Cancelled;
        }
        FireOutcome::Due(self.payload)
    }
}

#[derive(Debug)]
pub enum FireOutcome<T> {
    Pending(ScheduledTask<T>),
    Due(T),
    Cancelled,
}
