//! Media pipeline wrappers.
//!
//! A [`Context`] owns streams, ports and filters. Filters expose named inputs and outputs whose
//! ports can be rewired, and streams deliver events through event queues. Every wrapper is
//! unique per native handle and keeps its owner alive.

use std::fmt;
use std::sync::Arc;

use crate::errors::{BridgeError, BridgeResult};
use crate::gc::SlotList;
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{self, Collaborator, OwnerPolicy, Ownership, Wrapper};
use crate::params::{ParamBlock, ParamDescriptor};
use crate::registry;
use crate::Traverse;

mod event;
pub use self::event::{Event, EventQueue, EventType, RawEvent};

mod filter;
pub use self::filter::{Filter, FilterInput, FilterOutput};

mod port;
pub use self::port::{Port, PortKind};

#[cfg(test)]
mod tests;

/// The native media library.
///
/// Creation functions return `None` when the library fails to allocate.
///
/// # Safety
/// Blocks filled by `get_parameters` and payloads returned by `next_event` are decoded as the
/// descriptors say. Every `String` or `StringList` field in them must be null or point to
/// valid data, and that data must stay valid until the next call for the same filter or until
/// the event is destroyed.
pub unsafe trait PipelineBackend: Collaborator {
    fn open_context(&self) -> Option<RawHandle>;

    fn open_port(&self, context: RawHandle, kind: PortKind, driver: &str) -> Option<RawHandle>;

    fn open_stream(
        &self,
        context: RawHandle,
        audio: Option<RawHandle>,
        video: Option<RawHandle>,
    ) -> Option<RawHandle>;

    fn open_filter(
        &self,
        context: RawHandle,
        name: &str,
        audio_targets: &[RawHandle],
        video_targets: &[RawHandle],
    ) -> Option<RawHandle>;

    fn filter_inputs(&self, filter: RawHandle) -> Vec<RawHandle>;

    fn filter_outputs(&self, filter: RawHandle) -> Vec<RawHandle>;

    /// The name of a filter input or output.
    fn endpoint_name(&self, endpoint: RawHandle) -> String;

    /// The port data sent to `input` is delivered to.
    fn input_port(&self, input: RawHandle) -> Option<(PortKind, RawHandle)>;

    /// The port `output` currently sends data to.
    fn output_port(&self, output: RawHandle) -> Option<(PortKind, RawHandle)>;

    /// Sends the data of `output` to `port`. Returns false if the library refuses.
    fn wire(&self, output: RawHandle, kind: PortKind, port: RawHandle) -> bool;

    fn new_event_queue(&self, stream: RawHandle) -> Option<RawHandle>;

    /// Takes the next pending event of `queue`, without blocking.
    fn next_event(&self, queue: RawHandle) -> Option<(RawHandle, RawEvent)>;

    /// The layout of the filter's parameter block, `None` without a parameter API.
    fn parameter_descriptors(&self, filter: RawHandle) -> Option<Vec<ParamDescriptor>>;

    fn parameter_block_size(&self, filter: RawHandle) -> usize;

    fn get_parameters(&self, filter: RawHandle, block: &mut ParamBlock) -> bool;

    /// Applies `block`. Text pointers in it point into the block's allocations, which the
    /// library takes with [`ParamBlock::take_allocations`] if it keeps them.
    fn set_parameters(&self, filter: RawHandle, block: &mut ParamBlock) -> bool;
}

/// Shared reference to a pipeline backend.
#[derive(Clone)]
pub struct Backend {
    api: Arc<dyn PipelineBackend>,
    collaborator: Arc<dyn Collaborator>,
}

impl Backend {
    pub fn new<B: PipelineBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            collaborator: backend.clone(),
            api: backend,
        }
    }

    #[inline]
    pub(crate) fn api(&self) -> &dyn PipelineBackend {
        &*self.api
    }

    #[inline]
    pub(crate) fn collaborator(&self) -> Arc<dyn Collaborator> {
        self.collaborator.clone()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Backend")
    }
}

/// The top-level library context.
#[derive(Traverse)]
pub struct Context {
    #[traverse]
    ownership: Ownership,
    backend: Backend,
}

impl Wrapper for Context {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Context {
    /// Creates a new library context.
    pub fn open(backend: &Backend) -> BridgeResult<Arc<Self>> {
        let raw = backend
            .api()
            .open_context()
            .ok_or_else(|| BridgeError::Allocation("context".to_owned()))?;
        ownership::destroy_unwrapped(
            &*backend.collaborator,
            TaggedHandle::new(raw, Capability::CONTEXT),
            Self::from_handle(backend, raw, true),
        )
    }

    /// Returns the wrapper of an existing context.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        disposes: bool,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::CONTEXT);
        registry::find_or_create(handle, disposes, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    None,
                    OwnerPolicy::NONE,
                    backend.collaborator(),
                )?,
                backend: backend.clone(),
            })
        })
    }

    /// Opens an output port using the named driver.
    pub fn open_port(self: &Arc<Self>, kind: PortKind, driver: &str) -> BridgeResult<Arc<Port>> {
        let raw = self
            .backend
            .api()
            .open_port(self.handle().raw(), kind, driver)
            .ok_or_else(|| BridgeError::Allocation(format!("{} port '{}'", kind, driver)))?;
        ownership::destroy_unwrapped(
            &*self.backend.collaborator,
            TaggedHandle::new(raw, kind.capability()),
            Port::from_handle(&self.backend, kind, raw, Some(self.clone()), true),
        )
    }

    /// Opens a stream playing to the given ports.
    pub fn open_stream(
        self: &Arc<Self>,
        audio: Option<&Arc<Port>>,
        video: Option<&Arc<Port>>,
    ) -> BridgeResult<Arc<Stream>> {
        for (port, kind) in [(audio, PortKind::Audio), (video, PortKind::Video)] {
            if let Some(port) = port.filter(|p| p.kind() != kind) {
                return Err(BridgeError::KindMismatch(port.handle()));
            }
        }

        let raw = self
            .backend
            .api()
            .open_stream(
                self.handle().raw(),
                audio.map(|p| p.handle().raw()),
                video.map(|p| p.handle().raw()),
            )
            .ok_or_else(|| BridgeError::Allocation("stream".to_owned()))?;

        let ports = audio.into_iter().chain(video).cloned().collect();
        ownership::destroy_unwrapped(
            &*self.backend.collaborator,
            TaggedHandle::new(raw, Capability::STREAM),
            Stream::from_handle(&self.backend, raw, self, ports, true),
        )
    }

    /// Creates a filter plugin feeding the given target ports.
    pub fn open_filter(
        self: &Arc<Self>,
        name: &str,
        audio_targets: &[Arc<Port>],
        video_targets: &[Arc<Port>],
    ) -> BridgeResult<Arc<Filter>> {
        Filter::open(&self.backend, self, name, audio_targets, video_targets)
    }
}

/// A media stream.
#[derive(Traverse)]
pub struct Stream {
    #[traverse]
    ownership: Ownership,
    #[traverse]
    ports: SlotList<Port>,
    backend: Backend,
}

impl Wrapper for Stream {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Stream {
    const OWNERS: OwnerPolicy = OwnerPolicy::required(Capability::CONTEXT);

    /// Returns the wrapper of an existing stream.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        context: &Arc<Context>,
        ports: Vec<Arc<Port>>,
        disposes: bool,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::STREAM);
        registry::find_or_create(handle, disposes, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    Some(context.clone()),
                    Self::OWNERS,
                    backend.collaborator(),
                )?,
                ports: SlotList::new(ports),
                backend: backend.clone(),
            })
        })
    }

    /// The ports this stream plays to.
    pub fn ports(&self) -> Vec<Arc<Port>> {
        self.ports.to_vec()
    }

    /// Creates a queue receiving the events of this stream.
    pub fn event_queue(self: &Arc<Self>) -> BridgeResult<Arc<EventQueue>> {
        let raw = self
            .backend
            .api()
            .new_event_queue(self.handle().raw())
            .ok_or_else(|| BridgeError::Allocation("event queue".to_owned()))?;
        ownership::destroy_unwrapped(
            &*self.backend.collaborator,
            TaggedHandle::new(raw, Capability::EVENT_QUEUE),
            EventQueue::from_handle(&self.backend, raw, self, true),
        )
    }
}
