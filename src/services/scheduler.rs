//! Per-handle delayed re-evaluation with coalescing.
//!
//! Every delay the tracker needs (redraw debounce, host-wrapped retry, monitor
//! settle) goes through here as a timer on the runtime; nothing ever sleeps on
//! the owning loop. A handle has at most one pending timer: scheduling again
//! replaces it, whatever its purpose. A timer only reports its expiry through
//! the sink; the loop must `claim` it before acting, which is what makes
//! cancellation airtight.

use crate::debug_if_enabled;
use crate::events::WindowHandle;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Зачем запланирован таймер
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// Отложенная полная переоценка окна (debounce Redraw)
    Refresh,
    /// Однократная повторная проверка host-wrapped окна после Created
    HostRetry,
    /// Проверка неотслеживаемого окна после смены монитора
    MonitorSettle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub handle: WindowHandle,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    pub fn new(handle: WindowHandle, purpose: TimerPurpose) -> Self {
        Self { handle, purpose }
    }
}

/// Истёкший таймер, ожидающий подтверждения в цикле владельца
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub key: TimerKey,
    generation: u64,
}

pub type DeadlineSink = Arc<dyn Fn(Deadline) + Send + Sync>;

pub trait Scheduler: Send + Sync {
    /// Cancels whatever is pending for `key.handle` and arms a new timer.
    fn schedule(&self, key: TimerKey, delay: Duration);

    /// Cancels the pending timer of `handle`, if any.
    fn cancel(&self, handle: WindowHandle);

    fn cancel_all(&self);
}

/// Ожидающее обновление окна, не больше одного на дескриптор
#[derive(Debug)]
pub struct PendingUpdate {
    pub purpose: TimerPurpose,
    pub deadline: Instant,
    pub delay: Duration,
    generation: u64,
    task: JoinHandle<()>,
}

pub struct DebounceScheduler {
    pending: Arc<DashMap<WindowHandle, PendingUpdate>>,
    generation: AtomicU64,
    sink: DeadlineSink,
    runtime: Handle,
}

impl DebounceScheduler {
    pub fn new(runtime: Handle, sink: DeadlineSink) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            sink,
            runtime,
        }
    }

    /// Consumes an expired timer. `false` means it was cancelled or superseded and must be ignored.
    pub fn claim(&self, deadline: Deadline) -> bool {
        self.pending
            .remove_if(&deadline.key.handle, |_, pending| {
                pending.generation == deadline.generation && pending.purpose == deadline.key.purpose
            })
            .is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: TimerKey) -> bool {
        self.pending
            .get(&key.handle)
            .is_some_and(|pending| pending.purpose == key.purpose)
    }

    fn abort(pending: PendingUpdate) {
        pending.task.abort();
    }
}

impl Scheduler for DebounceScheduler {
    fn schedule(&self, key: TimerKey, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + delay;
        let sink = Arc::clone(&self.sink);

        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sink(Deadline { key, generation });
        });

        let replaced = self.pending.insert(
            key.handle,
            PendingUpdate {
                purpose: key.purpose,
                deadline,
                delay,
                generation,
                task,
            },
        );

        if let Some(previous) = replaced {
            debug_if_enabled!(
                "Таймер {:?} для {} заменён на {:?} ({}мс)",
                previous.purpose,
                key.handle,
                key.purpose,
                delay.as_millis()
            );
            Self::abort(previous);
        }
    }

    fn cancel(&self, handle: WindowHandle) {
        if let Some((_, pending)) = self.pending.remove(&handle) {
            Self::abort(pending);
        }
    }

    fn cancel_all(&self) {
        let handles: Vec<WindowHandle> = self.pending.iter().map(|entry| *entry.key()).collect();

        let mut cancelled = 0;
        for handle in handles {
            if let Some((_, pending)) = self.pending.remove(&handle) {
                Self::abort(pending);
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            debug_if_enabled!("Отменено {} отложенных таймеров", cancelled);
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
