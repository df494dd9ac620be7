use std::fmt;
use std::sync::Arc;

use super::{Backend, Context, Port, PortKind};
use crate::errors::{BridgeError, BridgeResult};
use crate::gc::{Slot, SlotList};
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{self, OwnerPolicy, Ownership, Wrapper};
use crate::params::{self, ParamBlock, ParamDescriptor, ParamMap};
use crate::registry;
use crate::Traverse;

/// A filter plugin inserted between a stream and its output ports.
#[derive(Traverse)]
pub struct Filter {
    #[traverse]
    ownership: Ownership,
    #[traverse]
    audio_targets: SlotList<Port>,
    #[traverse]
    video_targets: SlotList<Port>,
    name: String,
    backend: Backend,
}

impl Wrapper for Filter {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Filter {
    const OWNERS: OwnerPolicy = OwnerPolicy::required(Capability::CONTEXT);

    pub(super) fn open(
        backend: &Backend,
        context: &Arc<Context>,
        name: &str,
        audio_targets: &[Arc<Port>],
        video_targets: &[Arc<Port>],
    ) -> BridgeResult<Arc<Self>> {
        let audio = raw_targets(audio_targets, PortKind::Audio)?;
        let video = raw_targets(video_targets, PortKind::Video)?;

        let raw = backend
            .api()
            .open_filter(context.handle().raw(), name, &audio, &video)
            .ok_or_else(|| BridgeError::Allocation(format!("filter '{}'", name)))?;

        let handle = TaggedHandle::new(raw, Capability::FILTER);
        let wrapped = registry::find_or_create(handle, true, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    Some(context.clone()),
                    Self::OWNERS,
                    backend.collaborator(),
                )?,
                audio_targets: SlotList::new(audio_targets.to_vec()),
                video_targets: SlotList::new(video_targets.to_vec()),
                name: name.to_owned(),
                backend: backend.clone(),
            })
        });
        ownership::destroy_unwrapped(&*backend.collaborator, handle, wrapped)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn audio_targets(&self) -> Vec<Arc<Port>> {
        self.audio_targets.to_vec()
    }

    pub fn video_targets(&self) -> Vec<Arc<Port>> {
        self.video_targets.to_vec()
    }

    pub fn inputs(self: &Arc<Self>) -> BridgeResult<Vec<Arc<FilterInput>>> {
        let raw = self.handle().raw();
        self.backend
            .api()
            .filter_inputs(raw)
            .into_iter()
            .map(|input| FilterInput::from_handle(&self.backend, input, self))
            .collect()
    }

    pub fn outputs(self: &Arc<Self>) -> BridgeResult<Vec<Arc<FilterOutput>>> {
        let raw = self.handle().raw();
        self.backend
            .api()
            .filter_outputs(raw)
            .into_iter()
            .map(|output| FilterOutput::from_handle(&self.backend, output, self))
            .collect()
    }

    /// Returns the input with the given name.
    pub fn input(self: &Arc<Self>, name: &str) -> BridgeResult<Option<Arc<FilterInput>>> {
        Ok(self.inputs()?.into_iter().find(|i| i.name() == name))
    }

    /// Returns the output with the given name.
    pub fn output(self: &Arc<Self>, name: &str) -> BridgeResult<Option<Arc<FilterOutput>>> {
        Ok(self.outputs()?.into_iter().find(|o| o.name() == name))
    }

    /// The layout of the parameter block, `None` if the filter has no parameters.
    pub fn parameter_descriptors(&self) -> Option<Vec<ParamDescriptor>> {
        self.backend
            .api()
            .parameter_descriptors(self.handle().raw())
    }

    /// Reads the current parameters, `Ok(None)` if the filter has no parameters.
    pub fn parameters(&self) -> BridgeResult<Option<ParamMap>> {
        let Some((descriptors, block)) = self.fetch_parameters()? else {
            return Ok(None);
        };
        // SAFETY: `PipelineBackend` implementors fill pointer fields with null or valid data.
        let map = unsafe { params::read(&block, &descriptors) }?;
        Ok(Some(map))
    }

    /// Updates the parameters present in `map`.
    ///
    /// Returns false if the filter has no parameters.
    pub fn set_parameters(&self, map: &ParamMap) -> BridgeResult<bool> {
        let Some((descriptors, mut block)) = self.fetch_parameters()? else {
            return Ok(false);
        };
        params::write(&mut block, &descriptors, map)?;

        if !self
            .backend
            .api()
            .set_parameters(self.handle().raw(), &mut block)
        {
            return Err(BridgeError::Native(format!(
                "setting parameters of filter '{}'",
                self.name
            )));
        }
        Ok(true)
    }

    fn fetch_parameters(&self) -> BridgeResult<Option<(Vec<ParamDescriptor>, ParamBlock)>> {
        let raw = self.handle().raw();
        let api = self.backend.api();
        let Some(descriptors) = api.parameter_descriptors(raw) else {
            return Ok(None);
        };

        let mut block = ParamBlock::zeroed(api.parameter_block_size(raw));
        if !api.get_parameters(raw, &mut block) {
            return Err(BridgeError::Native(format!(
                "reading parameters of filter '{}'",
                self.name
            )));
        }
        Ok(Some((descriptors, block)))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("handle", &self.handle())
            .field("name", &self.name)
            .finish()
    }
}

fn raw_targets(targets: &[Arc<Port>], kind: PortKind) -> BridgeResult<Vec<RawHandle>> {
    targets
        .iter()
        .map(|port| {
            if port.kind() == kind {
                Ok(port.handle().raw())
            } else {
                Err(BridgeError::KindMismatch(port.handle()))
            }
        })
        .collect()
}

const ENDPOINT_OWNERS: OwnerPolicy = OwnerPolicy::required(Capability::FILTER);

fn endpoint_port(
    backend: &Backend,
    found: Option<(PortKind, RawHandle)>,
    owner: Arc<dyn Wrapper>,
) -> BridgeResult<Option<Arc<Port>>> {
    match found {
        Some((kind, raw)) => Port::from_handle(backend, kind, raw, Some(owner), false).map(Some),
        None => Ok(None),
    }
}

/// A named input of a filter.
#[derive(Traverse)]
pub struct FilterInput {
    #[traverse]
    ownership: Ownership,
    name: String,
    backend: Backend,
}

impl Wrapper for FilterInput {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl FilterInput {
    /// Returns the wrapper of an input of `filter`. The filter owns its inputs.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        filter: &Arc<Filter>,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::FILTER_INPUT);
        registry::find_or_create(handle, false, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    Some(filter.clone()),
                    ENDPOINT_OWNERS,
                    backend.collaborator(),
                )?,
                name: backend.api().endpoint_name(raw),
                backend: backend.clone(),
            })
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port the data sent to this input is delivered to.
    pub fn port(self: &Arc<Self>) -> BridgeResult<Option<Arc<Port>>> {
        let found = self.backend.api().input_port(self.handle().raw());
        endpoint_port(&self.backend, found, self.clone())
    }
}

/// A named output of a filter.
#[derive(Traverse)]
pub struct FilterOutput {
    #[traverse]
    ownership: Ownership,
    #[traverse]
    target: Slot<Port>,
    name: String,
    backend: Backend,
}

impl Wrapper for FilterOutput {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl FilterOutput {
    /// Returns the wrapper of an output of `filter`. The filter owns its outputs.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        filter: &Arc<Filter>,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::FILTER_OUTPUT);
        registry::find_or_create(handle, false, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    Some(filter.clone()),
                    ENDPOINT_OWNERS,
                    backend.collaborator(),
                )?,
                target: Slot::empty(),
                name: backend.api().endpoint_name(raw),
                backend: backend.clone(),
            })
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port this output currently sends data to.
    pub fn port(self: &Arc<Self>) -> BridgeResult<Option<Arc<Port>>> {
        let found = self.backend.api().output_port(self.handle().raw());
        endpoint_port(&self.backend, found, self.clone())
    }

    /// Sends the data of this output to `port`, keeping the port alive while wired.
    pub fn wire(&self, port: &Arc<Port>) -> BridgeResult<()> {
        let raw = self.handle().raw();
        if !self
            .backend
            .api()
            .wire(raw, port.kind(), port.handle().raw())
        {
            return Err(BridgeError::Native(format!(
                "wiring output '{}' to {}",
                self.name,
                port.handle()
            )));
        }

        log::debug!("wired {} to {}", self.handle(), port.handle());
        let previous = self.target.replace(Some(port.clone()));
        drop(previous);
        Ok(())
    }

    /// The port last wired with [`FilterOutput::wire`].
    pub fn target(&self) -> Option<Arc<Port>> {
        self.target.get()
    }
}
