//! The Core: the single long-lived process-wide object.
//!
//! Owns the event loop host, the built-in timer registry, the user-facing
//! timers, the queued-response cache, the shared-buffer retainer, the
//! filesystem descriptor table, and the Conduit. Construction does no I/O;
//! the reactor comes up lazily and is torn down exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::conduit::Conduit;
use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::fs::FsTable;
use crate::queued_response::{QueuedResponse, QueuedResponses};
use crate::shared_buffer::SharedBufferRetainer;
use crate::timers::{BuiltinTimer, IntervalCancel, TimerId, TimerRegistry, Timers};

const RELEASE_STALE_DESCRIPTORS: &str = "release_stale_descriptors";
const RELEASE_EXPIRED_SHARED_BUFFERS: &str = "release_expired_shared_buffers";

/// Construction options for [`Core`].
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Drive the reactor on a dedicated worker thread instead of expecting
    /// the host GUI loop to call `turn()`. Unconditionally on for Android
    /// and Windows; opt-in on Linux; Apple hosts use their dispatch queue.
    pub dedicated_loop_thread: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            dedicated_loop_thread: cfg!(any(target_os = "android", target_os = "windows")),
        }
    }
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// The runtime core. See the module docs.
pub struct Core {
    event_loop: Arc<EventLoop>,
    timer_registry: Arc<TimerRegistry>,
    timers: Timers,
    queued_responses: Arc<QueuedResponses>,
    shared_buffers: Arc<SharedBufferRetainer>,
    fs: Arc<FsTable>,
    conduit: Arc<Conduit>,
    /// Teardown hooks (child-process shutdown on desktop) run first during
    /// `shutdown()`.
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    timers_installed: AtomicBool,
    shutdown_started: AtomicBool,
}

impl Core {
    pub fn new(options: CoreOptions) -> Self {
        let event_loop = Arc::new(EventLoop::new(options.dedicated_loop_thread));
        let fs = Arc::new(FsTable::new());
        let shared_buffers = Arc::new(SharedBufferRetainer::new());
        let queued_responses = Arc::new(QueuedResponses::new());

        let descriptor_fs = Arc::clone(&fs);
        let expiring_responses = Arc::clone(&queued_responses);
        let sweep_buffers = Arc::clone(&shared_buffers);
        let timer_registry = Arc::new(TimerRegistry::new(
            Arc::clone(&event_loop),
            vec![
                BuiltinTimer {
                    name: RELEASE_STALE_DESCRIPTORS,
                    timeout: 1024,
                    interval: 0,
                    repeated: true,
                    // one coarse reclamation tick: stale descriptors and
                    // expired queued responses
                    invoke: Arc::new(move || {
                        descriptor_fs.release_stale_descriptors();
                        expiring_responses.expire();
                    }),
                },
                BuiltinTimer {
                    name: RELEASE_EXPIRED_SHARED_BUFFERS,
                    timeout: 8,
                    interval: 0,
                    repeated: true,
                    invoke: Arc::new(move || sweep_buffers.sweep()),
                },
            ],
        ));
        shared_buffers.bind_timer(
            timer_registry
                .control(RELEASE_EXPIRED_SHARED_BUFFERS)
                .expect("sweep timer is registered at construction"),
        );

        let timers = Timers::new(Arc::clone(&event_loop));
        let conduit = Arc::new(Conduit::new(Arc::clone(&event_loop)));

        Self {
            event_loop,
            timer_registry,
            timers,
            queued_responses,
            shared_buffers,
            fs,
            conduit,
            shutdown_hooks: Mutex::new(Vec::new()),
            timers_installed: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
        }
    }

    // component access

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn conduit(&self) -> &Arc<Conduit> {
        &self.conduit
    }

    pub fn fs(&self) -> &Arc<FsTable> {
        &self.fs
    }

    pub fn queued_responses(&self) -> &Arc<QueuedResponses> {
        &self.queued_responses
    }

    pub fn shared_buffers(&self) -> &Arc<SharedBufferRetainer> {
        &self.shared_buffers
    }

    // event loop facade

    /// Starts the event loop (idempotent) and installs the built-in timers
    /// on the first start.
    pub fn run_event_loop(&self) -> Result<()> {
        self.event_loop.run()?;

        if !self.timers_installed.swap(true, Ordering::SeqCst) {
            let registry = Arc::clone(&self.timer_registry);
            self.event_loop.dispatch(move || {
                registry.init_timers();
                registry.start_timers();
            });
        }

        Ok(())
    }

    /// Whether the core has begun (or finished) shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.event_loop.is_shutting_down()
    }

    /// Enqueues work onto the loop, starting it if necessary. Returns
    /// `false` once shutdown has begun or when the queue refuses the
    /// closure.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if self.run_event_loop().is_err() {
            return false;
        }
        self.event_loop.dispatch(job)
    }

    pub fn sleep_event_loop(&self, ms: i64) {
        self.event_loop.sleep(ms);
    }

    pub fn get_event_loop_timeout(&self) -> i64 {
        self.event_loop.get_timeout()
    }

    pub fn is_loop_alive(&self) -> bool {
        self.event_loop.is_alive()
    }

    // user timers

    pub fn set_timeout(&self, timeout_ms: u64, callback: impl FnOnce() + Send + 'static) -> TimerId {
        self.timers.set_timeout(timeout_ms, callback)
    }

    pub fn set_interval(
        &self,
        interval_ms: u64,
        callback: impl Fn(&IntervalCancel) + Send + 'static,
    ) -> TimerId {
        self.timers.set_interval(interval_ms, callback)
    }

    pub fn set_immediate(&self, callback: impl FnOnce() + Send + 'static) -> TimerId {
        self.timers.set_immediate(callback)
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.timers.clear_timeout(id)
    }

    pub fn clear_interval(&self, id: TimerId) -> bool {
        self.timers.clear_interval(id)
    }

    pub fn clear_immediate(&self, id: TimerId) -> bool {
        self.timers.clear_immediate(id)
    }

    // queued responses facade

    pub fn put_queued_response(&self, id: u64, response: QueuedResponse) {
        self.queued_responses.put(id, response);
    }

    pub fn get_queued_response(&self, id: u64) -> Option<QueuedResponse> {
        self.queued_responses.get(id)
    }

    pub fn has_queued_response(&self, id: u64) -> bool {
        self.queued_responses.has(id)
    }

    pub fn remove_queued_response(&self, id: u64) {
        self.queued_responses.remove(id);
    }

    pub fn create_queued_response(
        &self,
        seq: &str,
        params: &str,
        response: QueuedResponse,
    ) -> String {
        self.queued_responses.create(seq, params, response)
    }

    // shared buffers facade

    pub fn retain_shared_buffer(&self, pointer: Arc<[u8]>, ttl_ms: u32) {
        self.shared_buffers.retain(pointer, ttl_ms);
    }

    pub fn release_shared_buffer(&self, pointer: &Arc<[u8]>) {
        self.shared_buffers.release(pointer);
    }

    // lifecycle

    /// Registers a hook run at the start of `shutdown()`, before timers and
    /// the loop stop. The desktop child-process module registers its
    /// teardown here.
    pub fn register_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.shutdown_hooks.lock().push(Box::new(hook));
    }

    /// Ordered, idempotent teardown: shutdown hooks, timers, conduit, the
    /// event loop (joining its thread), then cached state. After this every
    /// `send`/`emit`/`dispatch` observes shutdown and returns `false`.
    pub fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target = "runtime.core", "shutting down");

        let hooks: Vec<ShutdownHook> = self.shutdown_hooks.lock().drain(..).collect();
        for hook in hooks {
            hook();
        }

        self.timer_registry.stop_timers();
        self.conduit.stop();
        self.event_loop.stop();
        self.queued_responses.remove_all();
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

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

    fn dedicated_core() -> Core {
        Core::new(CoreOptions {
            dedicated_loop_thread: true,
        })
    }

    #[test]
    fn test_construction_does_no_io() {
        let core = dedicated_core();
        assert_eq!(core.get_event_loop_timeout(), -1);
        assert!(!core.is_loop_alive());
        assert!(!core.is_shutting_down());
    }

    #[test]
    fn test_dispatch_starts_loop_and_runs() {
        let core = dedicated_core();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        assert!(core.dispatch(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));
        core.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_refuses_new_work() {
        let core = dedicated_core();
        core.run_event_loop().unwrap();
        core.shutdown();
        core.shutdown();
        assert!(core.is_shutting_down());
        assert!(!core.dispatch(|| {}));
    }

    #[test]
    fn test_shutdown_hooks_run_once_in_order() {
        let core = dedicated_core();
        let order = Arc::new(Mutex::new(Vec::new()));
        for value in 0..3 {
            let order = Arc::clone(&order);
            core.register_shutdown_hook(move || order.lock().push(value));
        }
        core.shutdown();
        core.shutdown();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_shutdown_clears_queued_responses() {
        let core = dedicated_core();
        core.put_queued_response(7, QueuedResponse::with_body("abc"));
        core.shutdown();
        assert!(!core.has_queued_response(7));
    }

    #[test]
    fn test_shared_buffer_expires_via_builtin_timer() {
        let core = dedicated_core();
        core.run_event_loop().unwrap();

        let pointer: Arc<[u8]> = Arc::from(b"buffer".to_vec());
        // wait for the dispatched timer installation before retaining
        assert!(wait_for(|| core.get_event_loop_timeout() != 0));
        core.retain_shared_buffer(Arc::clone(&pointer), 40);
        assert!(core.shared_buffers().contains(&pointer));

        assert!(wait_for(|| !core.shared_buffers().contains(&pointer)));
        assert!(wait_for(|| core.shared_buffers().is_empty()));
        core.shutdown();
    }

    #[test]
    fn test_user_timer_via_core() {
        let core = dedicated_core();
        core.run_event_loop().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        core.set_timeout(8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));
        core.shutdown();
    }
}
