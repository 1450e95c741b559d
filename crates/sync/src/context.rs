//! The serial context that owns all generator state mutation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relaysync_core::SyncResult;
use relaysync_requests::NewRequestsNotifier;

use crate::timer::{Clock, Timer, TokioClock, TokioTimer};

/// Single serial execution context shared by every generator.
///
/// Selection, in-flight bookkeeping, index allocation and flag consumption all
/// run inside [`SyncContext::perform`], and so do completion handlers and timer
/// wake-ups before they touch generator state. At most one such step runs at a
/// time, whichever thread the driver or the transport calls from.
///
/// `perform` is not reentrant: collaborators invoked from inside it (request
/// encoders, response parsers, sign-out handlers) must not call back into a
/// generator synchronously.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    gate: Arc<Mutex<()>>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` with exclusive access to generator state.
    pub fn perform<R>(&self, work: impl FnOnce() -> R) -> R {
        let _guard = lock(&self.gate);
        work()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What every generator shares: the serial context, the clock and timer
/// facility, and the channel that wakes the driver.
#[derive(Clone)]
pub struct SyncEnvironment {
    pub context: SyncContext,
    pub clock: Arc<dyn Clock>,
    pub timer: Arc<dyn Timer>,
    pub notifier: NewRequestsNotifier,
}

impl SyncEnvironment {
    pub fn new(clock: Arc<dyn Clock>, timer: Arc<dyn Timer>, notifier: NewRequestsNotifier) -> Self {
        Self {
            context: SyncContext::new(),
            clock,
            timer,
            notifier,
        }
    }

    /// Environment backed by the current tokio runtime's clock and timers.
    pub fn tokio(notifier: NewRequestsNotifier) -> SyncResult<Self> {
        Ok(Self::new(
            Arc::new(TokioClock),
            Arc::new(TokioTimer::current()?),
            notifier,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn perform_serializes_concurrent_steps() {
        let context = SyncContext::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let context = context.clone();
                let active = active.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        context.perform(|| {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
