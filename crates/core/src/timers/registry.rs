//! Built-in timer registry.
//!
//! Each built-in timer is a reactor task parked on a watch channel. Arming
//! bumps a generation so an already-started timer is re-armed (its ticker
//! restarts) rather than double-started. `init_timers`, `start_timers`, and
//! `stop_timers` are idempotent per their flags and guarded by the timers
//! mutex.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::event_loop::EventLoop;

pub(crate) type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Specification of one built-in timer. `timeout` doubles as the period when
/// `repeated` is set and `interval` is zero.
pub(crate) struct BuiltinTimer {
    pub name: &'static str,
    pub timeout: u64,
    pub interval: u64,
    pub repeated: bool,
    pub invoke: TimerCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmCommand {
    armed: bool,
    generation: u64,
}

/// Arms and disarms one registered timer. Cheap to clone; the shared-buffer
/// retainer holds one to park its sweep while the list is empty.
#[derive(Clone)]
pub(crate) struct TimerControl {
    tx: Arc<watch::Sender<ArmCommand>>,
}

impl TimerControl {
    fn new() -> (Self, watch::Receiver<ArmCommand>) {
        let (tx, rx) = watch::channel(ArmCommand {
            armed: false,
            generation: 0,
        });
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Arms the timer, restarting its ticker if it was already armed.
    pub(crate) fn arm(&self) {
        self.tx.send_modify(|cmd| {
            cmd.armed = true;
            cmd.generation += 1;
        });
    }

    /// Parks the timer until the next `arm`.
    pub(crate) fn disarm(&self) {
        self.tx.send_modify(|cmd| {
            cmd.armed = false;
            cmd.generation += 1;
        });
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.tx.borrow().armed
    }
}

struct RegisteredTimer {
    spec: Arc<BuiltinTimer>,
    control: TimerControl,
    rx: Option<watch::Receiver<ArmCommand>>,
    started: bool,
}

struct RegistryState {
    timers: Vec<RegisteredTimer>,
    did_init: bool,
    did_start: bool,
}

/// The fixed built-in timer set. See the module docs.
pub struct TimerRegistry {
    event_loop: Arc<EventLoop>,
    /// The timers mutex.
    state: Mutex<RegistryState>,
}

impl TimerRegistry {
    pub(crate) fn new(event_loop: Arc<EventLoop>, specs: Vec<BuiltinTimer>) -> Self {
        let timers = specs
            .into_iter()
            .map(|spec| {
                let (control, rx) = TimerControl::new();
                RegisteredTimer {
                    spec: Arc::new(spec),
                    control,
                    rx: Some(rx),
                    started: false,
                }
            })
            .collect();

        Self {
            event_loop,
            state: Mutex::new(RegistryState {
                timers,
                did_init: false,
                did_start: false,
            }),
        }
    }

    /// Control handle for the named timer.
    pub(crate) fn control(&self, name: &str) -> Option<TimerControl> {
        self.state
            .lock()
            .timers
            .iter()
            .find(|timer| timer.spec.name == name)
            .map(|timer| timer.control.clone())
    }

    /// Attaches every built-in timer to the reactor. Idempotent.
    pub fn init_timers(&self) {
        let mut state = self.state.lock();
        if state.did_init {
            return;
        }

        for timer in &mut state.timers {
            let Some(rx) = timer.rx.take() else { continue };
            let spec = Arc::clone(&timer.spec);
            let event_loop = Arc::clone(&self.event_loop);
            if let Err(err) = self
                .event_loop
                .spawn(run_builtin_timer(spec, rx, event_loop))
            {
                error!(target = "runtime.timers", error = %err, "failed to attach timer");
            }
        }

        state.did_init = true;
        debug!(target = "runtime.timers", "built-in timers attached");
    }

    /// Starts not-yet-started timers and re-arms already-started ones.
    pub fn start_timers(&self) {
        let mut state = self.state.lock();
        for timer in &mut state.timers {
            timer.control.arm();
            timer.started = true;
        }
        state.did_start = true;
    }

    /// Stops timers that were started. A no-op before the first start.
    pub fn stop_timers(&self) {
        let mut state = self.state.lock();
        if !state.did_start {
            return;
        }

        for timer in &state.timers {
            if timer.started {
                timer.control.disarm();
            }
        }
        state.did_start = false;
    }
}

async fn run_builtin_timer(
    spec: Arc<BuiltinTimer>,
    mut rx: watch::Receiver<ArmCommand>,
    event_loop: Arc<EventLoop>,
) {
    let slot = event_loop.register_deadline();
    let mut guard = None;

    loop {
        let command = *rx.borrow_and_update();
        if !command.armed {
            guard = None;
            slot.clear();
            if rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        if guard.is_none() {
            guard = Some(event_loop.register_handle());
        }

        let period = if spec.interval > 0 {
            spec.interval
        } else {
            spec.timeout
        };
        let period = Duration::from_millis(period.max(1));
        let first = tokio::time::Instant::now() + Duration::from_millis(spec.timeout);
        slot.set(first.into_std());

        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    (spec.invoke)();
                    if !spec.repeated {
                        guard = None;
                        slot.clear();
                        if rx.changed().await.is_err() {
                            return;
                        }
                        break;
                    }
                    slot.set(std::time::Instant::now() + period);
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    // Re-read the command: an arm restarts the ticker, a
                    // disarm parks the task.
                    break;
                }
            }
        }
    }
}
