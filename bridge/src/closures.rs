//! Registry of host callbacks invokable from guest code.
//!
//! The reference table publishes each registered closure as
//! `HostValue::Closure(id)`; the registry owns the boxed callback and its
//! marshaling shape. During an invocation the callback is taken out of its
//! slot and restored afterwards, which doubles as a cheap detector for
//! reentrant invocation of the same closure.

use std::collections::HashMap;

use tether_hostapi::{ClosureId, ClosureShape, HostCallback};

struct ClosureEntry {
    shape: ClosureShape,
    // None while the callback is executing.
    callback: Option<Box<dyn HostCallback>>,
}

/// Storage for registered closures, keyed by [`ClosureId`].
#[derive(Default)]
pub struct ClosureRegistry {
    entries: HashMap<u32, ClosureEntry>,
    next: u32,
}

impl ClosureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a fresh id.
    pub fn register(&mut self, shape: ClosureShape, callback: Box<dyn HostCallback>) -> ClosureId {
        let id = self.next;
        self.next += 1;
        self.entries.insert(
            id,
            ClosureEntry {
                shape,
                callback: Some(callback),
            },
        );
        ClosureId(id)
    }

    /// Marshaling shape of a registered closure.
    pub fn shape(&self, id: ClosureId) -> Option<ClosureShape> {
        self.entries.get(&id.0).map(|e| e.shape)
    }

    /// Take the callback out for invocation. Returns `None` if the closure
    /// was destroyed or is already executing.
    pub fn take(&mut self, id: ClosureId) -> Option<Box<dyn HostCallback>> {
        self.entries.get_mut(&id.0).and_then(|e| e.callback.take())
    }

    /// Put a callback back after invocation.
    pub fn restore(&mut self, id: ClosureId, callback: Box<dyn HostCallback>) {
        if let Some(entry) = self.entries.get_mut(&id.0) {
            entry.callback = Some(callback);
        }
    }

    /// Drop a closure's entry. Returns `false` if it was already gone.
    pub fn remove(&mut self, id: ClosureId) -> bool {
        self.entries.remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
