//! User-facing timers: `set_timeout`, `set_interval`, `set_immediate`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::event_loop::EventLoop;

pub type TimerId = u64;

/// Handed to interval callbacks so an interval can cancel itself.
#[derive(Clone)]
pub struct IntervalCancel {
    cancelled: Arc<AtomicBool>,
}

impl IntervalCancel {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type Entries = Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>;

/// The user-facing timer table. Ids are unique for the core's lifetime.
pub struct Timers {
    event_loop: Arc<EventLoop>,
    next_id: AtomicU64,
    entries: Entries,
}

impl Timers {
    pub(crate) fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            event_loop,
            next_id: AtomicU64::new(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn next_id(&self) -> TimerId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn set_timeout(&self, timeout_ms: u64, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let id = self.next_id();
        let entries = Arc::clone(&self.entries);
        let event_loop = Arc::clone(&self.event_loop);

        let spawned = self.event_loop.spawn(async move {
            let _guard = event_loop.register_handle();
            let slot = event_loop.register_deadline();
            slot.set(std::time::Instant::now() + Duration::from_millis(timeout_ms));
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            entries.lock().remove(&id);
            callback();
        });

        match spawned {
            Ok(task) => {
                self.entries.lock().insert(id, task);
            }
            Err(err) => {
                warn!(target = "runtime.timers", error = %err, "set_timeout after reactor teardown");
            }
        }
        id
    }

    pub fn set_interval(
        &self,
        interval_ms: u64,
        callback: impl Fn(&IntervalCancel) + Send + 'static,
    ) -> TimerId {
        let id = self.next_id();
        let entries = Arc::clone(&self.entries);
        let event_loop = Arc::clone(&self.event_loop);
        let cancel = IntervalCancel {
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let spawned = self.event_loop.spawn(async move {
            let _guard = event_loop.register_handle();
            let slot = event_loop.register_deadline();
            let period = Duration::from_millis(interval_ms.max(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                slot.set(std::time::Instant::now() + period);
                ticker.tick().await;
                if cancel.is_cancelled() {
                    break;
                }
                callback(&cancel);
                if cancel.is_cancelled() {
                    break;
                }
            }
            entries.lock().remove(&id);
        });

        match spawned {
            Ok(task) => {
                self.entries.lock().insert(id, task);
            }
            Err(err) => {
                warn!(target = "runtime.timers", error = %err, "set_interval after reactor teardown");
            }
        }
        id
    }

    pub fn set_immediate(&self, callback: impl FnOnce() + Send + 'static) -> TimerId {
        self.set_timeout(0, callback)
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.clear(id)
    }

    pub fn clear_interval(&self, id: TimerId) -> bool {
        self.clear(id)
    }

    pub fn clear_immediate(&self, id: TimerId) -> bool {
        self.clear(id)
    }

    fn clear(&self, id: TimerId) -> bool {
        match self.entries.lock().remove(&id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(4));
        }
        false
    }

    #[test]
    fn test_timeout_fires_once_and_ids_are_unique() {
        let event_loop = Arc::new(EventLoop::new(true));
        event_loop.run().unwrap();
        let timers = Timers::new(Arc::clone(&event_loop));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let a = timers.set_timeout(8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let b = timers.set_immediate(|| {});
        assert_ne!(a, b);

        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));
        assert!(!timers.clear_timeout(a), "entry removed after firing");
        event_loop.stop();
    }

    #[test]
    fn test_clear_timeout_prevents_firing() {
        let event_loop = Arc::new(EventLoop::new(true));
        event_loop.run().unwrap();
        let timers = Timers::new(Arc::clone(&event_loop));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = timers.set_timeout(200, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.clear_timeout(id));

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        event_loop.stop();
    }

    #[test]
    fn test_interval_cancels_itself() {
        let event_loop = Arc::new(EventLoop::new(true));
        event_loop.run().unwrap();
        let timers = Timers::new(Arc::clone(&event_loop));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        timers.set_interval(8, move |cancel| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                cancel.cancel();
            }
        });

        assert!(wait_for(|| hits.load(Ordering::SeqCst) >= 3));
        std::thread::sleep(Duration::from_millis(64));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        event_loop.stop();
    }
}
