use std::ffi::c_int;
use std::fmt;
use std::mem;
use std::sync::Arc;

use super::{Backend, Stream};
use crate::errors::BridgeResult;
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{self, OwnerPolicy, Ownership, Wrapper};
use crate::params::{self, ParamBlock, ParamDescriptor, ParamMap, ParamResult, ParamType};
use crate::registry;
use crate::Traverse;

/// An event as taken from the native queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: c_int,
    /// A copy of the payload bytes.
    pub data: Vec<u8>,
}

/// Event types with a known payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    SetTitle,
    FrameFormatChange,
    Progress,
    NumButtons,
    DroppedFrames,
    Other(c_int),
}

impl From<c_int> for EventType {
    fn from(value: c_int) -> Self {
        match value {
            3 => EventType::SetTitle,
            5 => EventType::FrameFormatChange,
            8 => EventType::Progress,
            10 => EventType::NumButtons,
            12 => EventType::DroppedFrames,
            x => EventType::Other(x),
        }
    }
}

impl From<EventType> for c_int {
    fn from(value: EventType) -> Self {
        match value {
            EventType::SetTitle => 3,
            EventType::FrameFormatChange => 5,
            EventType::Progress => 8,
            EventType::NumButtons => 10,
            EventType::DroppedFrames => 12,
            EventType::Other(x) => x,
        }
    }
}

const INT: usize = mem::size_of::<c_int>();
const PTR: usize = mem::size_of::<*const u8>();
const TITLE_LEN: usize = 256;

fn int_fields(names: &[&str]) -> Vec<ParamDescriptor> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| ParamDescriptor::new(name, ParamType::Int, i * INT, INT))
        .collect()
}

impl EventType {
    /// The layout of this event type's payload.
    pub fn layout(self) -> Option<Vec<ParamDescriptor>> {
        match self {
            EventType::SetTitle => Some(vec![ParamDescriptor::new(
                "str",
                ParamType::Char,
                2 * INT,
                TITLE_LEN,
            )]),
            EventType::FrameFormatChange => {
                Some(int_fields(&["width", "height", "aspect", "pan_scan"]))
            }
            EventType::Progress => Some(vec![
                ParamDescriptor::new("description", ParamType::String, 0, PTR),
                ParamDescriptor::new("percent", ParamType::Int, PTR, INT),
            ]),
            EventType::NumButtons => Some(int_fields(&["num_buttons"])),
            EventType::DroppedFrames => Some(int_fields(&[
                "skipped_frames",
                "skipped_threshold",
                "discarded_frames",
                "discarded_threshold",
            ])),
            EventType::Other(_) => None,
        }
    }
}

/// Decodes an event payload.
///
/// A payload the size of an `int` is also exposed as `int`. Types without a known layout, or
/// whose payload doesn't match it, expose the bytes as `data`.
///
/// # Safety
/// Pointer fields of the payload must be null or valid.
unsafe fn decode(event: &RawEvent) -> ParamResult<ParamMap> {
    let mut map = ParamMap::new();
    if let Ok(bytes) = <[u8; INT]>::try_from(event.data.as_slice()) {
        map.set("int", &i64::from(c_int::from_ne_bytes(bytes)))?;
    }

    let event_type = EventType::from(event.event_type);
    let decoded = event_type.layout().map(|layout| {
        let block = ParamBlock::from_bytes(event.data.clone());
        params::read(&block, &layout)
    });

    match decoded {
        Some(Ok(fields)) => {
            for (name, value) in &fields {
                map.set_value(name, value.clone())?;
            }
        }
        Some(Err(error)) => {
            log::debug!("undecodable {:?} event payload: {}", event_type, error);
            map.set("data", &event.data)?;
        }
        None => map.set("data", &event.data)?,
    }
    Ok(map)
}

/// A queue receiving the events of a stream.
#[derive(Traverse)]
pub struct EventQueue {
    #[traverse]
    ownership: Ownership,
    backend: Backend,
}

impl Wrapper for EventQueue {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl EventQueue {
    const OWNERS: OwnerPolicy = OwnerPolicy::required(Capability::STREAM);

    /// Returns the wrapper of an existing event queue.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        stream: &Arc<Stream>,
        disposes: bool,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::EVENT_QUEUE);
        registry::find_or_create(handle, disposes, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    Some(stream.clone()),
                    Self::OWNERS,
                    backend.collaborator(),
                )?,
                backend: backend.clone(),
            })
        })
    }

    /// Takes the next pending event, `None` if the queue is empty.
    pub fn next_event(self: &Arc<Self>) -> BridgeResult<Option<Arc<Event>>> {
        match self.backend.api().next_event(self.handle().raw()) {
            Some((raw, event)) => ownership::destroy_unwrapped(
                &*self.backend.collaborator,
                TaggedHandle::new(raw, Capability::EVENT),
                Event::from_handle(&self.backend, raw, event, self),
            )
            .map(Some),
            None => Ok(None),
        }
    }
}

/// An event taken from a queue. Dropping it frees the native event.
#[derive(Traverse)]
pub struct Event {
    #[traverse]
    ownership: Ownership,
    event_type: EventType,
    data: ParamMap,
}

impl Wrapper for Event {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Event {
    const OWNERS: OwnerPolicy = OwnerPolicy::required(Capability::EVENT_QUEUE);

    fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        event: RawEvent,
        queue: &Arc<EventQueue>,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::EVENT);
        registry::find_or_create(handle, true, |registration| {
            // SAFETY: `PipelineBackend` implementors keep payload pointers valid while the
            // event lives.
            let data = unsafe { decode(&event) }?;
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    Some(queue.clone()),
                    Self::OWNERS,
                    backend.collaborator(),
                )?,
                event_type: EventType::from(event.event_type),
                data,
            })
        })
    }

    #[inline]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// The decoded payload.
    #[inline]
    pub fn data(&self) -> &ParamMap {
        &self.data
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("handle", &self.handle())
            .field("event_type", &self.event_type)
            .field("data", &self.data)
            .finish()
    }
}
