use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between a caller and one generation.
///
/// Passing the optional deadline counts as cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: Mutex::new(false),
                signal: Condvar::new(),
                deadline: Some(deadline),
            }),
        }
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let flagged = *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        flagged || self.deadline_passed()
    }

    /// Sleeps up to `timeout`, waking early on cancel. Returns whether the token is cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let limit = match (Instant::now().checked_add(timeout), self.inner.deadline) {
            (Some(limit), Some(deadline)) => Some(limit.min(deadline)),
            (limit, deadline) => limit.or(deadline),
        };
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*cancelled {
            cancelled = match limit {
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        break;
                    }
                    match self.inner.signal.wait_timeout(cancelled, limit - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                // Unbounded: only cancel() can end the wait.
                None => match self.inner.signal.wait(cancelled) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                },
            };
        }
        let flagged = *cancelled;
        drop(cancelled);
        flagged || self.deadline_passed()
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}
