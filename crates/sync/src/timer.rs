//! Clock and one-shot timer facility.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relaysync_core::{SyncError, SyncResult};

use crate::context::lock;

/// Source of "now" for cooldown bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Time as seen by the tokio runtime (follows `tokio::time::pause`/`advance`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.elapsed) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *lock(&self.elapsed)
    }
}

/// Callback run when a one-shot timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules deferred one-shot callbacks.
pub trait Timer: Send + Sync {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Cancels a scheduled callback. Dropping the handle leaves the timer armed.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the callback if it has not fired yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl core::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Timers backed by `tokio::time::sleep` on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: tokio::runtime::Handle,
}

impl TokioTimer {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> SyncResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::config(format!("no tokio runtime for timers: {e}")))?;
        Ok(Self::new(runtime))
    }
}

impl Timer for TokioTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle::new(move || task.abort())
    }
}

struct ScheduledCallback {
    id: u64,
    delay: Duration,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualTimerState {
    next_id: u64,
    scheduled: Vec<ScheduledCallback>,
}

/// Timer whose callbacks only run when [`ManualTimer::fire_all`] is called.
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of the callbacks still armed, in scheduling order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        lock(&self.state).scheduled.iter().map(|s| s.delay).collect()
    }

    /// Run every armed callback. Returns how many ran.
    pub fn fire_all(&self) -> usize {
        let due = std::mem::take(&mut lock(&self.state).scheduled);
        let fired = due.len();
        for scheduled in due {
            (scheduled.callback)();
        }
        fired
    }
}

impl Timer for ManualTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.scheduled.push(ScheduledCallback {
                id,
                delay,
                callback,
            });
            id
        };

        let state = Arc::downgrade(&self.state);
        TimerHandle::new(move || {
            if let Some(state) = state.upgrade() {
                lock(&state).scheduled.retain(|s| s.id != id);
            }
        })
    }
}
