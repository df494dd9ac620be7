use std::fmt;
use std::sync::Arc;

use super::Backend;
use crate::errors::BridgeResult;
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{OwnerPolicy, Ownership, Wrapper};
use crate::registry;
use crate::Traverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Audio,
    Video,
}

impl PortKind {
    #[inline]
    pub fn capability(self) -> Capability {
        match self {
            PortKind::Audio => Capability::AUDIO_PORT,
            PortKind::Video => Capability::VIDEO_PORT,
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Audio => f.write_str("audio"),
            PortKind::Video => f.write_str("video"),
        }
    }
}

/// An audio or video output port.
///
/// While the library reports the port as attached downstream, collectors neither traverse nor
/// clear it.
#[derive(Traverse)]
#[traverse(unless = is_live)]
pub struct Port {
    #[traverse]
    ownership: Ownership,
    kind: PortKind,
    backend: Backend,
}

impl Wrapper for Port {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Port {
    const OWNERS: OwnerPolicy = OwnerPolicy::required(
        Capability::FILTER_INPUT
            .union(Capability::FILTER_OUTPUT)
            .union(Capability::CONTEXT)
            .union(Capability::STREAM),
    );

    /// Returns the wrapper of an existing port.
    pub fn from_handle(
        backend: &Backend,
        kind: PortKind,
        raw: RawHandle,
        owner: Option<Arc<dyn Wrapper>>,
        disposes: bool,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, kind.capability());
        registry::find_or_create(handle, disposes, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    owner,
                    Self::OWNERS,
                    backend.collaborator(),
                )?,
                kind,
                backend: backend.clone(),
            })
        })
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// Returns true while the port is wired into a running pipeline.
    pub fn is_live(&self) -> bool {
        self.backend.api().is_handle_live(self.handle())
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("handle", &self.handle())
            .field("kind", &self.kind)
            .finish()
    }
}
