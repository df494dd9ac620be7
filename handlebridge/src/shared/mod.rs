//! Shared-reference handles.
//!
//! Any number of [`SharedRef`] aliases may point at one native handle. A counter kept beside the
//! handle tracks them; the native resource is destroyed when the last alias goes away. Each
//! handle also carries an [`AttributeTable`] that lives exactly as long as the counter.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use crate::errors::{BridgeError, BridgeResult};
use crate::gc::{self, Slot, Trace, Traced, Traverse, Visit};
use crate::handle::TaggedHandle;
use crate::ownership::{Collaborator, Wrapper};
use crate::state;

mod attributes;
pub use self::attributes::{AttrValue, AttributeTable};


pub(crate) struct SharedEntry {
    count: usize,
    anchor: Weak<SharedAnchor>,
    owner: Option<Arc<dyn Wrapper>>,
    attrs: Option<AttributeTable>,
    collaborator: Arc<dyn Collaborator>,
}

impl SharedEntry {
    fn edges(&self) -> Vec<Traced> {
        let mut edges: Vec<Traced> = self.attrs.iter().flat_map(|t| t.edges()).collect();
        edges.extend(self.owner.as_ref().map(Traced::of));
        edges
    }
}

/// The collector's view of the state kept for one shared handle.
///
/// Every alias holds the anchor, so the collector sees the attribute values and owner of a
/// handle once, whatever the number of aliases.
pub struct SharedAnchor {
    handle: TaggedHandle,
}

impl SharedAnchor {
    fn is_current(&self, entry: &SharedEntry) -> bool {
        std::ptr::eq(entry.anchor.as_ptr(), self)
    }
}

impl Traverse for SharedAnchor {
    fn traverse(&self, visit: &mut Visit<'_>) -> ControlFlow<()> {
        let edges = match state::lock().shared.get(&self.handle) {
            Some(entry) if self.is_current(entry) => entry.edges(),
            _ => Vec::new(),
        };
        for target in edges {
            if visit(target).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn clear(&self) {
        let released = {
            let mut state = state::lock();
            match state.shared.get_mut(&self.handle) {
                Some(entry) if self.is_current(entry) => {
                    Some((entry.attrs.take(), entry.owner.take()))
                }
                _ => None,
            }
        };
        drop(released);
    }
}

/// One alias of a shared native handle.
pub struct SharedRef {
    handle: TaggedHandle,
    anchor: Slot<SharedAnchor>,
}

impl SharedRef {
    /// Creates a new alias of `handle`.
    ///
    /// The first alias records `owner` and `collaborator`; later aliases keep the recorded ones.
    /// Fails with [`BridgeError::KindMismatch`] if `handle` belongs to a registered wrapper.
    pub fn wrap(
        handle: TaggedHandle,
        owner: Option<Arc<dyn Wrapper>>,
        collaborator: Arc<dyn Collaborator>,
    ) -> BridgeResult<Self> {
        let (anchor, created, count, unused) = {
            let mut state = state::lock();
            if state.registry.contains_key(&handle) {
                drop(state);
                return Err(BridgeError::KindMismatch(handle));
            }

            match state.shared.get_mut(&handle) {
                Some(entry) => {
                    entry.count += 1;
                    let (anchor, created) = match entry.anchor.upgrade() {
                        Some(anchor) => (anchor, false),
                        None => {
                            let anchor = Arc::new(SharedAnchor { handle });
                            entry.anchor = Arc::downgrade(&anchor);
                            (anchor, true)
                        }
                    };
                    (anchor, created, entry.count, Some((owner, collaborator)))
                }
                None => {
                    let anchor = Arc::new(SharedAnchor { handle });
                    state.shared.insert(
                        handle,
                        SharedEntry {
                            count: 1,
                            anchor: Arc::downgrade(&anchor),
                            owner,
                            attrs: None,
                            collaborator,
                        },
                    );
                    (anchor, true, 1, None)
                }
            }
        };
        drop(unused);

        if created {
            gc::track(&anchor);
        }
        log::trace!("wrapped {} ({} aliases)", handle, count);
        Ok(Self {
            handle,
            anchor: Slot::new(Some(anchor)),
        })
    }

    #[inline]
    pub fn handle(&self) -> TaggedHandle {
        self.handle
    }

    /// Number of live aliases of this handle, including `self`.
    #[inline]
    pub fn alias_count(&self) -> usize {
        alias_count(self.handle)
    }

    /// The owner recorded by the first alias, unless a collector cleared it.
    pub fn owner(&self) -> Option<Arc<dyn Wrapper>> {
        state::lock()
            .shared
            .get(&self.handle)
            .and_then(|entry| entry.owner.clone())
    }

    #[inline]
    pub fn get_attr(&self, name: &str) -> Option<AttrValue> {
        get_attr(self.handle, name).ok().flatten()
    }

    #[inline]
    pub fn set_attr(&self, name: &str, value: Option<AttrValue>) {
        // Cannot fail while an alias is alive.
        let _ = set_attr(self.handle, name, value);
    }

    #[inline]
    pub fn attr_names(&self) -> Vec<String> {
        attr_names(self.handle).unwrap_or_default()
    }
}

impl fmt::Debug for SharedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRef")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Trace for SharedRef {
    #[inline]
    fn trace(&self, visit: &mut Visit<'_>) -> ControlFlow<()> {
        self.anchor.trace(visit)
    }

    fn untrace(&self) {
        // The attributes and owner live beside the counter, not in the alias.
        if let Some(anchor) = self.anchor.take() {
            anchor.clear();
        }
    }
}

impl Drop for SharedRef {
    fn drop(&mut self) {
        let released = {
            let mut state = state::lock();
            match state.shared.get_mut(&self.handle) {
                Some(entry) if entry.count > 1 => {
                    entry.count -= 1;
                    None
                }
                Some(_) => state.shared.remove(&self.handle),
                None => None,
            }
        };

        if let Some(SharedEntry {
            attrs,
            owner,
            collaborator,
            ..
        }) = released
        {
            drop(attrs);
            log::debug!("destroying shared {}", self.handle);
            collaborator.destroy_resource(self.handle);
            drop(owner);
        }
    }
}

/// Returns the attribute `name` of a shared handle.
pub fn get_attr(handle: TaggedHandle, name: &str) -> BridgeResult<Option<AttrValue>> {
    let state = state::lock();
    let entry = state
        .shared
        .get(&handle)
        .ok_or(BridgeError::UnknownHandle(handle))?;
    Ok(entry
        .attrs
        .as_ref()
        .and_then(|attrs| attrs.get(name))
        .cloned())
}

/// Stores the attribute `name` of a shared handle, or deletes it when `value` is `None`.
///
/// The table is created on first use. A replaced or deleted value is released.
pub fn set_attr(handle: TaggedHandle, name: &str, value: Option<AttrValue>) -> BridgeResult<()> {
    let (result, released) = {
        let mut state = state::lock();
        match state.shared.get_mut(&handle) {
            None => (Err(BridgeError::UnknownHandle(handle)), value),
            Some(entry) => match value {
                Some(value) => (
                    Ok(()),
                    entry
                        .attrs
                        .get_or_insert_with(AttributeTable::default)
                        .insert(name, value),
                ),
                None => (
                    Ok(()),
                    entry.attrs.as_mut().and_then(|attrs| attrs.remove(name)),
                ),
            },
        }
    };
    drop(released);
    result
}

/// Names of the attributes set on a shared handle.
pub fn attr_names(handle: TaggedHandle) -> BridgeResult<Vec<String>> {
    let state = state::lock();
    let entry = state
        .shared
        .get(&handle)
        .ok_or(BridgeError::UnknownHandle(handle))?;
    Ok(entry
        .attrs
        .iter()
        .flat_map(|attrs| attrs.names())
        .map(str::to_owned)
        .collect())
}

/// Number of live aliases of `handle`, zero if it isn't wrapped.
pub fn alias_count(handle: TaggedHandle) -> usize {
    state::lock()
        .shared
        .get(&handle)
        .map_or(0, |entry| entry.count)
}
