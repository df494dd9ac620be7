//! Display connections.

use std::fmt;
use std::sync::Arc;

use crate::errors::{BridgeError, BridgeResult};
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{self, Collaborator, OwnerPolicy, Ownership, Wrapper};
use crate::registry;
use crate::Traverse;

/// The native windowing library.
pub trait DisplayBackend: Collaborator {
    /// Connects to the named display, or the default one. `None` on failure.
    fn open_display(&self, name: Option<&str>) -> Option<RawHandle>;

    /// The file descriptor of the connection.
    fn connection_number(&self, display: RawHandle) -> i32;
}

/// Shared reference to a display backend.
#[derive(Clone)]
pub struct Backend {
    api: Arc<dyn DisplayBackend>,
    collaborator: Arc<dyn Collaborator>,
}

impl Backend {
    pub fn new<B: DisplayBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            collaborator: backend.clone(),
            api: backend,
        }
    }
}

/// A connection to a display server.
#[derive(Traverse)]
pub struct Display {
    #[traverse]
    ownership: Ownership,
    name: Option<String>,
    backend: Backend,
}

impl Wrapper for Display {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Display {
    /// Connects to the display `name`, or the default display.
    pub fn open(backend: &Backend, name: Option<&str>) -> BridgeResult<Arc<Self>> {
        let raw = backend.api.open_display(name).ok_or_else(|| {
            BridgeError::Allocation(format!("display '{}'", name.unwrap_or("default")))
        })?;
        ownership::destroy_unwrapped(
            &*backend.collaborator,
            TaggedHandle::new(raw, Capability::DISPLAY),
            Self::from_handle(backend, raw, name, true),
        )
    }

    /// Returns the wrapper of an existing connection.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        name: Option<&str>,
        disposes: bool,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::DISPLAY);
        registry::find_or_create(handle, disposes, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    None,
                    OwnerPolicy::NONE,
                    backend.collaborator.clone(),
                )?,
                name: name.map(str::to_owned),
                backend: backend.clone(),
            })
        })
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn connection_number(&self) -> i32 {
        self.backend.api.connection_number(self.handle().raw())
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("handle", &self.handle())
            .field("name", &self.name)
            .finish()
    }
}
