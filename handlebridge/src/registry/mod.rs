//! The handle registry.
//!
//! Maps a [`TaggedHandle`] to the unique wrapper for it. Entries hold the wrapper weakly, so the
//! registry never keeps a wrapper alive.

use std::any::Any;
use std::sync::{Arc, Weak};

use crate::errors::{BridgeError, BridgeResult};
use crate::gc;
use crate::handle::TaggedHandle;
use crate::ownership::{Registration, Wrapper};
use crate::state;


pub(crate) struct Entry {
    wrapper: Weak<dyn Wrapper>,
    any: Weak<dyn Any + Send + Sync>,
    generation: u64,
    pub(crate) disposes: bool,
}

impl Entry {
    fn new<W: Wrapper>(wrapper: &Arc<W>) -> Self {
        let ownership = wrapper.ownership();
        let weak: Weak<W> = Arc::downgrade(wrapper);
        Self {
            wrapper: weak.clone(),
            any: weak,
            generation: ownership.generation(),
            disposes: ownership.disposes(),
        }
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.wrapper.strong_count() > 0
    }
}

enum Probe {
    Live(Arc<dyn Any + Send + Sync>),
    InFlight,
    Vacant(u64),
}

fn probe(handle: TaggedHandle) -> Probe {
    let mut state = state::lock();
    if let Some(entry) = state.registry.get(&handle) {
        if let Some(any) = entry.any.upgrade() {
            return Probe::Live(any);
        }
        // The wrapper is gone but its drop hasn't unregistered yet.
        if entry.disposes {
            return Probe::InFlight;
        }
    }
    Probe::Vacant(state.reserve_generation())
}

fn downcast<W: Wrapper>(
    handle: TaggedHandle,
    any: Arc<dyn Any + Send + Sync>,
) -> BridgeResult<Arc<W>> {
    any.downcast::<W>()
        .map_err(|_| BridgeError::KindMismatch(handle))
}

/// Makes the live wrapper of `handle` the one that disposes it.
fn promote<W: Wrapper>(wrapper: &Arc<W>) -> BridgeResult<()> {
    let ownership = wrapper.ownership();
    let handle = ownership.handle();

    let mut state = state::lock();
    match state.registry.get_mut(&handle) {
        Some(entry) if entry.generation == ownership.generation() => {
            if entry.disposes {
                return Err(BridgeError::DoubleOwnership(handle));
            }
            log::debug!("{} now disposes its native resource", handle);
            entry.disposes = true;
            ownership.set_disposes(true);
            Ok(())
        }
        _ => Err(BridgeError::UnknownHandle(handle)),
    }
}

/// Returns the wrapper registered for `handle`, constructing it if there is none.
///
/// A live wrapper is returned as is. If `disposes` is set and the live wrapper already disposes
/// the handle this fails with [`BridgeError::DoubleOwnership`]; if it doesn't, it is promoted to
/// dispose the handle.
///
/// Otherwise `construct` runs, without the registry lock held, with the [`Registration`] the
/// wrapper's `Ownership` must be built from. The new wrapper is registered and tracked by the
/// process-wide collector. If `construct` fails nothing is registered.
pub fn find_or_create<W, F>(
    handle: TaggedHandle,
    disposes: bool,
    construct: F,
) -> BridgeResult<Arc<W>>
where
    W: Wrapper,
    F: FnOnce(Registration) -> BridgeResult<W>,
{
    let generation = match probe(handle) {
        Probe::Live(any) => {
            let wrapper = downcast::<W>(handle, any)?;
            log::trace!("registry hit for {}", handle);
            if disposes {
                promote(&wrapper)?;
            }
            return Ok(wrapper);
        }
        Probe::InFlight => {
            log::debug!("{} is being destroyed", handle);
            return Err(BridgeError::UnknownHandle(handle));
        }
        Probe::Vacant(generation) => generation,
    };

    let wrapper = Arc::new(construct(Registration::new(handle, generation, disposes))?);
    if wrapper.ownership().generation() != generation || wrapper.handle() != handle {
        return Err(BridgeError::KindMismatch(handle));
    }

    let raced = {
        let mut state = state::lock();
        let current = state
            .registry
            .get(&handle)
            .map(|entry| (entry.any.upgrade(), entry.disposes));
        match current {
            Some((Some(existing), _)) => Some(existing),
            Some((None, true)) => {
                drop(state);
                return Err(BridgeError::UnknownHandle(handle));
            }
            _ => {
                state.registry.insert(handle, Entry::new(&wrapper));
                wrapper.ownership().arm();
                None
            }
        }
    };

    match raced {
        Some(existing) => {
            // Another registration won, the unarmed wrapper drops without side effects.
            drop(wrapper);
            let existing = downcast::<W>(handle, existing)?;
            if disposes {
                promote(&existing)?;
            }
            Ok(existing)
        }
        None => {
            log::debug!("registered {}", handle);
            gc::track(&wrapper);
            Ok(wrapper)
        }
    }
}

/// Registers a wrapper built from [`Registration::reserve`].
pub fn register<W: Wrapper>(wrapper: &Arc<W>) -> BridgeResult<()> {
    let ownership = wrapper.ownership();
    let handle = ownership.handle();

    {
        let mut state = state::lock();
        if let Some(entry) = state.registry.get(&handle) {
            if entry.is_live() {
                return Err(if entry.disposes && ownership.disposes() {
                    BridgeError::DoubleOwnership(handle)
                } else {
                    BridgeError::AlreadyRegistered(handle)
                });
            }
            if entry.disposes {
                return Err(BridgeError::UnknownHandle(handle));
            }
        }
        state.registry.insert(handle, Entry::new(wrapper));
        ownership.arm();
    }

    log::debug!("registered {}", handle);
    gc::track(wrapper);
    Ok(())
}

/// Returns the live wrapper registered for `handle`.
pub fn lookup(handle: TaggedHandle) -> Option<Arc<dyn Wrapper>> {
    let found = state::lock()
        .registry
        .get(&handle)
        .and_then(|entry| entry.wrapper.upgrade());
    log::trace!("lookup of {}: {}", handle, if found.is_some() { "hit" } else { "miss" });
    found
}

/// Returns the live wrapper registered for `handle` if it is a `W`.
pub fn lookup_as<W: Wrapper>(handle: TaggedHandle) -> Option<Arc<W>> {
    let found = state::lock()
        .registry
        .get(&handle)
        .and_then(|entry| entry.any.upgrade());
    found.and_then(|any| any.downcast::<W>().ok())
}

/// Removes the entry for `handle`.
///
/// A live wrapper is disarmed: it will neither destroy the native resource nor unregister when
/// dropped. Use this for handles the native library destroyed by itself.
pub fn unregister(handle: TaggedHandle) -> BridgeResult<()> {
    let removed = state::lock().registry.remove(&handle);
    match removed {
        Some(entry) => {
            if let Some(wrapper) = entry.wrapper.upgrade() {
                wrapper.ownership().disarm();
            }
            log::debug!("unregistered {}", handle);
            Ok(())
        }
        None => {
            log::warn!("unregister of unknown handle {}", handle);
            Err(BridgeError::UnknownHandle(handle))
        }
    }
}

/// Removes the entry for `handle` if it still belongs to the given registration.
pub(crate) fn unregister_generation(handle: TaggedHandle, generation: u64) -> BridgeResult<()> {
    let mut state = state::lock();
    match state.registry.get(&handle) {
        Some(entry) if entry.generation == generation => {
            state.registry.remove(&handle);
            log::debug!("unregistered {}", handle);
            Ok(())
        }
        Some(_) => {
            log::debug!("{} was registered again, keeping the newer entry", handle);
            Ok(())
        }
        None => Err(BridgeError::UnknownHandle(handle)),
    }
}

/// Returns true if a live wrapper is registered for `handle`.
pub fn contains(handle: TaggedHandle) -> bool {
    state::lock()
        .registry
        .get(&handle)
        .is_some_and(Entry::is_live)
}

/// Number of live registered wrappers.
pub fn len() -> usize {
    state::lock()
        .registry
        .values()
        .filter(|entry| entry.is_live())
        .count()
}
