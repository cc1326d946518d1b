//! Filesystem descriptor table and the stale-descriptor reaper.
//!
//! The filesystem capability module owns the I/O; the core only tracks the
//! descriptors it hands out so that stale, unretained ones are closed by the
//! 1024 ms reaper instead of leaking. Descriptors are opaque here beyond the
//! predicates the reaper needs.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

pub type DescriptorId = u64;

/// Completion callback for `close`/`closedir`: `(seq, result)`.
pub type FsCallback = Box<dyn FnOnce(&str, crate::Result<()>) + Send>;

enum Resource {
    File(Option<File>),
    Directory { path: PathBuf, open: bool },
    Opaque,
}

/// One tracked descriptor.
pub struct Descriptor {
    pub id: DescriptorId,
    retained: AtomicBool,
    stale: AtomicBool,
    resource: Mutex<Resource>,
}

impl Descriptor {
    fn new(id: DescriptorId, resource: Resource) -> Arc<Self> {
        Arc::new(Self {
            id,
            retained: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            resource: Mutex::new(resource),
        })
    }

    /// A retained descriptor is pinned by its owner and never reaped.
    pub fn is_retained(&self) -> bool {
        self.retained.load(Ordering::SeqCst)
    }

    pub fn set_retained(&self, retained: bool) {
        self.retained.store(retained, Ordering::SeqCst);
    }

    /// Stale descriptors have been abandoned by the renderer side.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }

    pub fn is_directory(&self) -> bool {
        matches!(*self.resource.lock(), Resource::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(*self.resource.lock(), Resource::File(_))
    }

    fn release_resource(&self) {
        let mut resource = self.resource.lock();
        match &mut *resource {
            Resource::File(handle) => {
                let _ = handle.take();
            }
            Resource::Directory { open, .. } => {
                *open = false;
            }
            Resource::Opaque => {}
        }
    }
}

/// The descriptor map. The mutex is held briefly — per id, never across the
/// reaper's whole scan.
#[derive(Default)]
pub struct FsTable {
    descriptors: Mutex<HashMap<DescriptorId, Arc<Descriptor>>>,
}

impl FsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, id: DescriptorId, file: File) -> Arc<Descriptor> {
        self.add(id, Resource::File(Some(file)))
    }

    pub fn add_directory(&self, id: DescriptorId, path: impl Into<PathBuf>) -> Arc<Descriptor> {
        self.add(
            id,
            Resource::Directory {
                path: path.into(),
                open: true,
            },
        )
    }

    /// Tracks a descriptor of some other kind (socket-backed, virtual). The
    /// reaper erases these directly instead of closing.
    pub fn add_opaque(&self, id: DescriptorId) -> Arc<Descriptor> {
        self.add(id, Resource::Opaque)
    }

    fn add(&self, id: DescriptorId, resource: Resource) -> Arc<Descriptor> {
        let descriptor = Descriptor::new(id, resource);
        self.descriptors.lock().insert(id, Arc::clone(&descriptor));
        descriptor
    }

    pub fn get(&self, id: DescriptorId) -> Option<Arc<Descriptor>> {
        self.descriptors.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: DescriptorId) {
        self.descriptors.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.descriptors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.lock().is_empty()
    }

    /// Closes a file descriptor and forgets it.
    pub fn close(&self, seq: &str, id: DescriptorId, callback: FsCallback) {
        let descriptor = { self.descriptors.lock().remove(&id) };
        match descriptor {
            Some(descriptor) => {
                descriptor.release_resource();
                callback(seq, Ok(()));
            }
            None => callback(
                seq,
                Err(crate::Error::NotFound(format!("no descriptor for id {id}"))),
            ),
        }
    }

    /// Closes a directory descriptor and forgets it.
    pub fn closedir(&self, seq: &str, id: DescriptorId, callback: FsCallback) {
        self.close(seq, id, callback);
    }

    /// The 1024 ms reaper tick: close every stale, unretained descriptor.
    ///
    /// The id snapshot is taken under the lock, then the lock is re-acquired
    /// per id so a large table never pins the filesystem module.
    pub fn release_stale_descriptors(&self) {
        let ids: Vec<DescriptorId> = { self.descriptors.lock().keys().copied().collect() };

        for id in ids {
            let descriptor = {
                let descriptors = self.descriptors.lock();
                match descriptors.get(&id) {
                    Some(descriptor) => Arc::clone(descriptor),
                    // removed since the snapshot
                    None => continue,
                }
            };

            if descriptor.is_retained() || !descriptor.is_stale() {
                continue;
            }

            debug!(target = "runtime.fs", id, "reaping stale descriptor");
            if descriptor.is_directory() {
                self.closedir("", id, Box::new(|_, _| {}));
            } else if descriptor.is_file() {
                self.close("", id, Box::new(|_, _| {}));
            } else {
                self.remove(id);
            }
        }
    }
}
