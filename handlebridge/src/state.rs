//! The process-wide bookkeeping guarded by a single lock.
//!
//! The lock is never held while calling into a collaborator or a constructor, and no strong
//! wrapper reference is dropped while it is held: a drop may run `Ownership::drop`, which takes
//! the lock again.

use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::collections::BTreeMap;

use crate::handle::TaggedHandle;
use crate::registry::Entry;
use crate::shared::SharedEntry;

pub(crate) struct BridgeState {
    pub(crate) registry: BTreeMap<TaggedHandle, Entry>,
    pub(crate) shared: BTreeMap<TaggedHandle, SharedEntry>,
    next_generation: u64,
}

impl BridgeState {
    const fn new() -> Self {
        Self {
            registry: BTreeMap::new(),
            shared: BTreeMap::new(),
            next_generation: 1,
        }
    }

    /// Hands out a token identifying one registration of a handle.
    pub(crate) fn reserve_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

static STATE: Mutex<BridgeState> = const_mutex(BridgeState::new());

#[inline]
pub(crate) fn lock() -> MutexGuard<'static, BridgeState> {
    STATE.lock()
}
