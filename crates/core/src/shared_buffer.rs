//! Shared-buffer retainer.
//!
//! A buffer handed to an async write must stay alive until the completion
//! callback fires, even when the caller has otherwise let go of it. The
//! retainer keeps a strong reference for a caller-supplied TTL; a sweep with
//! 8 ms resolution decrements entries and drops expired ones.
//!
//! Released entries are lazy tombstones: the pointer is cleared and the TTL
//! zeroed, and only trailing tombstones are compacted (interior holes wait
//! until they reach the tail). The set is small and short-lived, so holes
//! never accumulate meaningfully. The sweep timer parks itself whenever the
//! list empties and is re-armed by the next retain.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::timers::TimerControl;

/// Sweep resolution in milliseconds.
pub const SWEEP_RESOLUTION_MS: u32 = 8;

struct Entry {
    pointer: Option<Arc<[u8]>>,
    ttl_ms: u32,
}

/// Strongly retains byte buffers for bounded lifetimes. See module docs.
#[derive(Default)]
pub struct SharedBufferRetainer {
    entries: Mutex<Vec<Entry>>,
    sweep_timer: OnceCell<TimerControl>,
}

impl SharedBufferRetainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the registry-owned sweep timer. Called once during core
    /// construction.
    pub(crate) fn bind_timer(&self, control: TimerControl) {
        let _ = self.sweep_timer.set(control);
    }

    /// Retains `pointer` for at least `ttl_ms - SWEEP_RESOLUTION_MS`
    /// milliseconds and re-arms the sweep.
    pub fn retain(&self, pointer: Arc<[u8]>, ttl_ms: u32) {
        self.entries.lock().push(Entry {
            pointer: Some(pointer),
            ttl_ms,
        });

        if let Some(timer) = self.sweep_timer.get() {
            if !timer.is_armed() {
                timer.arm();
            }
        }
    }

    /// Releases the first entry holding exactly this allocation. The entry
    /// becomes a tombstone collected by the sweep.
    pub fn release(&self, pointer: &Arc<[u8]>) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            let matches = entry
                .pointer
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, pointer));
            if matches {
                entry.pointer = None;
                entry.ttl_ms = 0;
                return;
            }
        }
    }

    /// True while any live entry holds this allocation.
    pub fn contains(&self, pointer: &Arc<[u8]>) -> bool {
        self.entries.lock().iter().any(|entry| {
            entry
                .pointer
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, pointer))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// One sweep tick: decrement TTLs, clear expired entries, pop trailing
    /// tombstones, and park the timer once the list is empty.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock();

        for entry in entries.iter_mut() {
            if entry.ttl_ms <= SWEEP_RESOLUTION_MS {
                entry.pointer = None;
                entry.ttl_ms = 0;
            } else {
                entry.ttl_ms -= SWEEP_RESOLUTION_MS;
            }
        }

        while entries.last().is_some_and(|entry| entry.pointer.is_none()) {
            entries.pop();
        }

        if entries.is_empty() {
            if let Some(timer) = self.sweep_timer.get() {
                timer.disarm();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(len: usize) -> Arc<[u8]> {
        Arc::from(vec![0u8; len])
    }

    #[test]
    fn test_retain_holds_strongly() {
        let retainer = SharedBufferRetainer::new();
        let pointer = buffer(16);
        retainer.retain(Arc::clone(&pointer), 40);

        assert!(retainer.contains(&pointer));
        assert!(Arc::strong_count(&pointer) >= 2);
    }

    #[test]
    fn test_sweep_expires_after_ttl() {
        let retainer = SharedBufferRetainer::new();
        let pointer = buffer(16);
        retainer.retain(Arc::clone(&pointer), 40);

        // 40ms at 8ms resolution: entry survives four sweeps, the fifth
        // clears it and tail compaction removes it.
        for _ in 0..4 {
            retainer.sweep();
            assert!(retainer.contains(&pointer));
        }
        retainer.sweep();
        assert!(!retainer.contains(&pointer));
        assert!(retainer.is_empty());
    }

    #[test]
    fn test_release_tombstones_until_tail() {
        let retainer = SharedBufferRetainer::new();
        let first = buffer(8);
        let second = buffer(8);
        retainer.retain(Arc::clone(&first), 1024);
        retainer.retain(Arc::clone(&second), 1024);

        retainer.release(&first);
        assert!(!retainer.contains(&first));
        // interior hole: still two slots until the tail clears
        assert_eq!(retainer.len(), 2);

        retainer.release(&second);
        retainer.sweep();
        assert!(retainer.is_empty());
    }

    #[test]
    fn test_release_only_first_match() {
        let retainer = SharedBufferRetainer::new();
        let pointer = buffer(8);
        retainer.retain(Arc::clone(&pointer), 1024);
        retainer.retain(Arc::clone(&pointer), 1024);

        retainer.release(&pointer);
        assert!(retainer.contains(&pointer));
    }
}
