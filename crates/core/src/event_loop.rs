//! Event loop host.
//!
//! Owns the async I/O reactor (a current-thread tokio runtime) and a
//! cross-thread dispatch queue. The reactor is created lazily on first use
//! and torn down exactly once; all reactor handles are touched only on the
//! loop thread, and cross-thread delivery goes through [`EventLoop::dispatch`].
//!
//! # Execution modes
//!
//! 1. **Dedicated-thread** — a worker thread drives the reactor:
//!    `sleep(timeout)` then drain-and-tick while the loop is running and
//!    alive. The platform default on Android and Windows, opt-in elsewhere.
//! 2. **Host-driven** — the host GUI loop owns scheduling and periodically
//!    calls [`EventLoop::turn`] (one non-blocking tick), using
//!    [`EventLoop::get_timeout`] as its wakeup hint. This is the
//!    prepare/check/dispatch contract of a GLib-style source expressed as
//!    methods; the platform source glue lives with the window layer.
//!
//! # Ordering
//!
//! The dispatch queue drains FIFO. Closures submitted from one thread run in
//! submission order; closures from distinct threads have no relative order.
//! The drain loop releases the loop lock around each closure, so dispatched
//! closures may re-enter `dispatch`.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Poll cadence of the dedicated loop thread while parked.
pub(crate) const EVENT_LOOP_POLL_TIMEOUT: i64 = 32;

/// Queued closures beyond this high-water mark make `dispatch` report
/// would-block instead of growing the queue without bound.
const DISPATCH_QUEUE_HIGH_WATER: usize = 4096;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Monotonic lifecycle states. Once shutdown starts the loop never accepts
/// new work again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::ShuttingDown,
            _ => LoopState::Stopped,
        }
    }
}

struct LoopShared {
    /// The reactor. `None` until the first `init()`.
    runtime: Option<Arc<Runtime>>,
    /// Cross-thread dispatch queue.
    queue: VecDeque<Job>,
}

/// The async I/O reactor host. See the module docs for the execution model.
pub struct EventLoop {
    state: AtomicU8,
    dedicated: bool,
    /// The loop mutex: guards reactor init and the dispatch queue.
    shared: Mutex<LoopShared>,
    /// Wakes the reactor when work is queued.
    wake: Notify,
    /// Live reactor handles (armed timers, sockets); the loop is alive while
    /// any exist or the queue is non-empty.
    handles: AtomicUsize,
    /// Next-wakeup hints fed by timer tasks, keyed by slot id.
    deadlines: Mutex<HashMap<u64, Instant>>,
    next_slot_id: AtomicU64,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventLoop {
    pub fn new(dedicated: bool) -> Self {
        Self {
            state: AtomicU8::new(LoopState::Idle as u8),
            dedicated,
            shared: Mutex::new(LoopShared {
                runtime: None,
                queue: VecDeque::new(),
            }),
            wake: Notify::new(),
            handles: AtomicUsize::new(0),
            deadlines: Mutex::new(HashMap::new()),
            next_slot_id: AtomicU64::new(1),
            thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state(), LoopState::ShuttingDown | LoopState::Stopped)
    }

    /// Initialises the reactor if it has not been created yet. Idempotent.
    ///
    /// # Errors
    ///
    /// Reactor construction failure is the only fatal startup condition and
    /// surfaces as [`Error::Internal`].
    pub fn init(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.runtime.is_some() {
            return Ok(());
        }

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::Internal(format!("failed to initialise reactor: {err}")))?;
        shared.runtime = Some(Arc::new(runtime));
        debug!(target = "runtime.loop", "reactor initialised");
        Ok(())
    }

    /// Returns the reactor, initialising it on first use.
    pub(crate) fn runtime(&self) -> Result<Arc<Runtime>> {
        self.init()?;
        Ok(self
            .shared
            .lock()
            .runtime
            .as_ref()
            .expect("reactor was just initialised")
            .clone())
    }

    /// Spawns a future onto the reactor.
    pub(crate) fn spawn<F>(&self, future: F) -> Result<tokio::task::JoinHandle<F::Output>>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.runtime()?.spawn(future))
    }

    /// Enqueues a closure to run on the loop thread as soon as possible.
    ///
    /// Returns `false` once shutdown has begun, and when the queue is at its
    /// high-water mark (would-block).
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        {
            let mut shared = self.shared.lock();
            if shared.queue.len() >= DISPATCH_QUEUE_HIGH_WATER {
                warn!(
                    target = "runtime.loop",
                    queued = shared.queue.len(),
                    "dispatch queue at high-water mark; refusing closure"
                );
                return false;
            }
            shared.queue.push_back(Box::new(job));
        }

        self.wake.notify_one();
        true
    }

    /// Drains the dispatch queue, one closure at a time. The loop lock is
    /// released while each closure runs so closures may re-enter `dispatch`.
    pub(crate) fn drain(&self) {
        loop {
            let job = { self.shared.lock().queue.pop_front() };
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Starts the loop. Idempotent while running.
    ///
    /// In dedicated-thread mode this spawns the worker thread; in host-driven
    /// mode the host is expected to begin calling [`EventLoop::turn`].
    pub fn run(self: &Arc<Self>) -> Result<()> {
        match self.state.compare_exchange(
            LoopState::Idle as u8,
            LoopState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(current) if current == LoopState::Running as u8 => return Ok(()),
            Err(_) => return Err(Error::Closed),
        }

        self.init()?;

        if self.dedicated {
            let event_loop = Arc::clone(self);
            let handle = thread::Builder::new()
                .name("runtime-event-loop".to_string())
                .spawn(move || poll_event_loop(event_loop))
                .map_err(|err| Error::Internal(format!("failed to spawn loop thread: {err}")))?;
            *self.thread.lock() = Some(handle);
        }

        Ok(())
    }

    /// Runs one non-blocking reactor tick: drains the dispatch queue and lets
    /// ready tasks (timers, socket readiness) make progress. Host-driven mode
    /// only; a no-op when the loop is not running.
    pub fn turn(&self) {
        if self.dedicated || !self.is_running() {
            return;
        }

        let Ok(runtime) = self.runtime() else { return };
        runtime.block_on(async {
            self.drain();
            tokio::task::yield_now().await;
            self.drain();
        });
    }

    /// The reactor's next-wakeup hint in milliseconds: `0` when work is
    /// queued or a deadline is due, the time until the earliest deadline
    /// otherwise, `-1` when nothing is armed.
    pub fn get_timeout(&self) -> i64 {
        if !self.shared.lock().queue.is_empty() {
            return 0;
        }

        let deadlines = self.deadlines.lock();
        match deadlines.values().min() {
            None => -1,
            Some(earliest) => {
                let now = Instant::now();
                if *earliest <= now {
                    0
                } else {
                    earliest.duration_since(now).as_millis() as i64
                }
            }
        }
    }

    /// True while any reactor handle is live or dispatch work is queued.
    pub fn is_alive(&self) -> bool {
        self.handles.load(Ordering::SeqCst) > 0 || !self.shared.lock().queue.is_empty()
    }

    /// Cooperative sleep: the requested duration is stretched to the
    /// reactor's own timeout when that is longer. Only the polling thread
    /// uses this.
    pub fn sleep(&self, ms: i64) {
        if ms <= 0 {
            return;
        }
        let timeout = self.get_timeout();
        let ms = if timeout > ms { timeout } else { ms };
        thread::sleep(Duration::from_millis(ms as u64));
    }

    /// Halts the loop: stops accepting new closures, wakes the reactor,
    /// joins the worker thread, and tears the reactor down. Idempotent; the
    /// state machine is monotonic so the loop never accepts work again.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            return;
        }

        if self
            .state
            .compare_exchange(
                LoopState::Running as u8,
                LoopState::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        self.wake.notify_one();

        let joinable = {
            let mut thread = self.thread.lock();
            match thread.take() {
                Some(handle) if handle.thread().id() == std::thread::current().id() => {
                    // stop() from a dispatched closure: the thread observes
                    // the state change and exits on its own.
                    None
                }
                other => other,
            }
        };
        if let Some(handle) = joinable {
            if handle.join().is_err() {
                error!(target = "runtime.loop", "loop thread panicked during shutdown");
            }
        }

        let runtime = self.shared.lock().runtime.take();
        if let Some(runtime) = runtime {
            match Arc::try_unwrap(runtime) {
                Ok(runtime) => runtime.shutdown_background(),
                Err(shared) => drop(shared),
            }
        }

        self.state.store(LoopState::Stopped as u8, Ordering::SeqCst);
        debug!(target = "runtime.loop", "event loop stopped");
    }

    /// Registers a live reactor handle; the loop stays alive until the guard
    /// drops.
    pub(crate) fn register_handle(self: &Arc<Self>) -> HandleGuard {
        self.handles.fetch_add(1, Ordering::SeqCst);
        HandleGuard {
            event_loop: Arc::clone(self),
        }
    }

    /// Registers a wakeup-hint slot for a timer. The slot feeds
    /// [`EventLoop::get_timeout`] and clears itself on drop.
    pub(crate) fn register_deadline(self: &Arc<Self>) -> DeadlineSlot {
        DeadlineSlot {
            id: self.next_slot_id.fetch_add(1, Ordering::SeqCst),
            event_loop: Arc::clone(self),
        }
    }
}

/// RAII guard for a live reactor handle.
pub(crate) struct HandleGuard {
    event_loop: Arc<EventLoop>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.event_loop.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A timer's entry in the loop's wakeup-hint table.
pub(crate) struct DeadlineSlot {
    id: u64,
    event_loop: Arc<EventLoop>,
}

impl DeadlineSlot {
    pub(crate) fn set(&self, deadline: Instant) {
        self.event_loop.deadlines.lock().insert(self.id, deadline);
    }

    pub(crate) fn clear(&self) {
        self.event_loop.deadlines.lock().remove(&self.id);
    }
}

impl Drop for DeadlineSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Body of the dedicated loop thread.
fn poll_event_loop(event_loop: Arc<EventLoop>) {
    let runtime = match event_loop.runtime() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(target = "runtime.loop", error = %err, "reactor unavailable; loop thread exiting");
            return;
        }
    };

    let poll = Duration::from_millis(EVENT_LOOP_POLL_TIMEOUT as u64);

    while event_loop.is_running() {
        event_loop.sleep(EVENT_LOOP_POLL_TIMEOUT);

        runtime.block_on(async {
            while event_loop.is_running() && event_loop.is_alive() {
                event_loop.drain();
                tokio::select! {
                    _ = event_loop.wake.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }

            // Nothing armed: park until new work or shutdown so an empty
            // loop does not spin.
            if event_loop.is_running() {
                tokio::select! {
                    _ = event_loop.wake.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        });
    }

    // Closures queued before shutdown still run to completion.
    event_loop.drain();
}
