//! Ownership and dispose policy of registered wrappers.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{BridgeError, BridgeResult};
use crate::gc::{Slot, Trace, Traverse, Visit};
use crate::handle::{Capability, TaggedHandle};
use crate::registry;
use crate::state;


/// The native library side of a wrapper's lifecycle.
pub trait Collaborator: Send + Sync {
    /// Releases the native resource behind `handle`.
    fn destroy_resource(&self, handle: TaggedHandle);

    /// Returns true while `handle` is attached to something downstream, such as a port wired
    /// into a running pipeline. Collectors skip such wrappers.
    fn is_handle_live(&self, handle: TaggedHandle) -> bool {
        let _ = handle;
        false
    }
}

/// Passes `wrapped` through, destroying the just-created resource `handle` if wrapping it
/// failed.
pub(crate) fn destroy_unwrapped<T>(
    collaborator: &dyn Collaborator,
    handle: TaggedHandle,
    wrapped: BridgeResult<T>,
) -> BridgeResult<T> {
    if let Err(err) = &wrapped {
        log::warn!("destroying {} after failed wrap: {}", handle, err);
        collaborator.destroy_resource(handle);
    }
    wrapped
}

/// A managed object exposing operations on one registered native handle.
pub trait Wrapper: Traverse + std::any::Any {
    fn ownership(&self) -> &Ownership;

    #[inline]
    fn handle(&self) -> TaggedHandle {
        self.ownership().handle()
    }
}

/// Which wrappers may own a wrapper of some kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerPolicy {
    pub accepted: Capability,
    pub required: bool,
}

impl OwnerPolicy {
    /// Top-level wrappers: no owner accepted.
    pub const NONE: Self = Self {
        accepted: Capability::empty(),
        required: false,
    };

    pub const fn required(accepted: Capability) -> Self {
        Self {
            accepted,
            required: true,
        }
    }

    pub const fn optional(accepted: Capability) -> Self {
        Self {
            accepted,
            required: false,
        }
    }

    /// Checks the tag of the candidate owner of a `kind` wrapper.
    pub fn validate(&self, kind: Capability, owner: Option<Capability>) -> BridgeResult<()> {
        match owner {
            None if self.required => {
                log::warn!("{} wrapper created without an owner", kind);
                Err(BridgeError::MissingOwner { kind })
            }
            None => Ok(()),
            Some(owner) if !owner.is_empty() && self.accepted.contains(owner) => Ok(()),
            Some(owner) => {
                log::warn!("unsupported owner {} for a {} wrapper", owner, kind);
                Err(BridgeError::InvalidOwner { kind, owner })
            }
        }
    }
}

/// Identifies one registration of a handle.
///
/// Handed to the constructor by [`registry::find_or_create`], or reserved up front for
/// [`registry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    handle: TaggedHandle,
    generation: u64,
    disposes: bool,
}

impl Registration {
    pub(crate) fn new(handle: TaggedHandle, generation: u64, disposes: bool) -> Self {
        Self {
            handle,
            generation,
            disposes,
        }
    }

    /// Reserves a registration for a wrapper that will be passed to [`registry::register`].
    pub fn reserve(handle: TaggedHandle, disposes: bool) -> Self {
        let generation = state::lock().reserve_generation();
        Self::new(handle, generation, disposes)
    }

    #[inline]
    pub fn handle(&self) -> TaggedHandle {
        self.handle
    }

    #[inline]
    pub fn disposes(&self) -> bool {
        self.disposes
    }
}

/// The lifecycle state every registered wrapper embeds.
///
/// Dropping an armed `Ownership` destroys the native resource if it disposes it, then
/// unregisters the handle, then releases the owner.
pub struct Ownership {
    handle: TaggedHandle,
    generation: u64,
    disposes: AtomicBool,
    armed: AtomicBool,
    owner: Slot<dyn Wrapper>,
    collaborator: Arc<dyn Collaborator>,
}

impl Ownership {
    /// Validates `owner` against `policy` and takes a strong reference to it.
    pub fn new(
        registration: Registration,
        owner: Option<Arc<dyn Wrapper>>,
        policy: OwnerPolicy,
        collaborator: Arc<dyn Collaborator>,
    ) -> BridgeResult<Self> {
        let owner_kind = owner.as_ref().map(|o| o.handle().capability());
        policy.validate(registration.handle.capability(), owner_kind)?;

        log::debug!(
            "new wrapper for {} (disposes: {})",
            registration.handle,
            registration.disposes
        );
        Ok(Self {
            handle: registration.handle,
            generation: registration.generation,
            disposes: AtomicBool::new(registration.disposes),
            armed: AtomicBool::new(false),
            owner: Slot::new(owner),
            collaborator,
        })
    }

    #[inline]
    pub fn handle(&self) -> TaggedHandle {
        self.handle
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if dropping the wrapper destroys the native resource.
    #[inline]
    pub fn disposes(&self) -> bool {
        self.disposes.load(Ordering::Acquire)
    }

    /// The owner, unless it was cleared by a collector.
    #[inline]
    pub fn owner(&self) -> Option<Arc<dyn Wrapper>> {
        self.owner.get()
    }

    #[inline]
    pub fn collaborator(&self) -> &Arc<dyn Collaborator> {
        &self.collaborator
    }

    /// Stops disposing the native resource, for resources the library already destroyed.
    pub fn forget(&self) {
        self.disposes.store(false, Ordering::Release);
        let mut state = state::lock();
        if let Some(entry) = state.registry.get_mut(&self.handle) {
            if entry.generation() == self.generation {
                entry.disposes = false;
            }
        }
    }

    pub(crate) fn set_disposes(&self, disposes: bool) {
        self.disposes.store(disposes, Ordering::Release);
    }

    pub(crate) fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub(crate) fn disarm(&self) {
        self.disposes.store(false, Ordering::Release);
        self.armed.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ownership")
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .field("disposes", &self.disposes())
            .field("owner", &self.owner)
            .finish()
    }
}

impl Trace for Ownership {
    #[inline]
    fn trace(&self, visit: &mut Visit<'_>) -> ControlFlow<()> {
        self.owner.trace(visit)
    }

    #[inline]
    fn untrace(&self) {
        self.owner.untrace()
    }
}

impl Drop for Ownership {
    fn drop(&mut self) {
        if !*self.armed.get_mut() {
            return;
        }

        if *self.disposes.get_mut() {
            log::debug!("destroying {}", self.handle);
            self.collaborator.destroy_resource(self.handle);
        }

        if let Err(error) = registry::unregister_generation(self.handle, self.generation) {
            log::warn!("{}", error);
        }
        // The owner slot is released after this, with the fields.
    }
}
