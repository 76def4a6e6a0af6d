//! Cancellable periodic and delayed callbacks on the tokio timer.
//!
//! Cancellation sets the handle's flag before aborting its task, so no
//! invocation starts once [`TaskTimer::cancel`] has returned.

use std::{
    collections::HashMap,
    future::Future,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{
    task::AbortHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::trace;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct TimerEntry {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerEntry {
    fn cancel(self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

#[derive(Default)]
struct TimerRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, TimerEntry>>,
}

impl TimerRegistry {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, TimerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, id: u64) {
        self.entries().remove(&id);
    }
}

/// Owner of a set of scheduled callbacks. Clones share the same registry.
///
/// Must be used from within a tokio runtime.
#[derive(Clone, Default)]
pub struct TaskTimer {
    registry: Arc<TimerRegistry>,
}

impl TaskTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` every `every`, first one interval from now, until the
    /// handle is cancelled or the callback returns [`ControlFlow::Break`].
    ///
    /// Invocations never overlap; a slow callback delays the next tick.
    pub fn schedule<F, Fut>(&self, every: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let (handle, cancelled) = self.register();
        let registry = Arc::clone(&self.registry);
        let every = every.max(MIN_INTERVAL);
        let task = tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                if callback().await.is_break() {
                    break;
                }
            }
            trace!(timer = handle.0, "recurring timer stopped by its callback");
            registry.finish(handle.0);
        });
        self.attach(handle, task.abort_handle());
        handle
    }

    /// Runs `callback` once after `delay` unless cancelled first.
    pub fn after<F, Fut>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (handle, cancelled) = self.register();
        let registry = Arc::clone(&self.registry);
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            callback().await;
            registry.finish(handle.0);
        });
        self.attach(handle, task.abort_handle());
        handle
    }

    /// Idempotent; unknown or already-finished handles are ignored.
    pub fn cancel(&self, handle: TimerHandle) {
        let entry = self.registry.entries().remove(&handle.0);
        if let Some(entry) = entry {
            trace!(timer = handle.0, "timer cancelled");
            entry.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<TimerEntry> = self
            .registry
            .entries()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        if !drained.is_empty() {
            trace!(count = drained.len(), "cancelling all timers");
        }
        for entry in drained {
            entry.cancel();
        }
    }

    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.registry.entries().contains_key(&handle.0)
    }

    pub fn active_count(&self) -> usize {
        self.registry.entries().len()
    }

    fn register(&self) -> (TimerHandle, Arc<AtomicBool>) {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.registry.entries().insert(
            id,
            TimerEntry {
                cancelled: Arc::clone(&cancelled),
                abort: None,
            },
        );
        (TimerHandle(id), cancelled)
    }

    fn attach(&self, handle: TimerHandle, abort: AbortHandle) {
        let mut entries = self.registry.entries();
        match entries.get_mut(&handle.0) {
            Some(entry) => entry.abort = Some(abort),
            // Cancelled (or already finished) between spawn and attach.
            None => abort.abort(),
        }
    }
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
