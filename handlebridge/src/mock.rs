//! An in-memory native library for tests.

use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::canvas::{CanvasBackend, Color, DrawableKind, Geometry};
use crate::display::DisplayBackend;
use crate::errors::BridgeResult;
use crate::gc::{SlotList, Traverse};
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{Collaborator, OwnerPolicy, Ownership, Registration, Wrapper};
use crate::params::{Allocations, ParamBlock, ParamDescriptor, ParamType};
use crate::pipeline::{PipelineBackend, PortKind, RawEvent};
use crate::registry;
use crate::Traverse;

static NEXT_ADDR: AtomicUsize = AtomicUsize::new(0x1000);
static SERIAL: Mutex<()> = const_mutex(());

/// Held by tests that use the process-wide registry or collector.
///
/// A collection running on another test thread briefly holds strong references to every
/// tracked wrapper, which would delay the drops a test is checking for.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// A handle value no other test uses.
pub(crate) fn fake_raw() -> RawHandle {
    let addr = NEXT_ADDR.fetch_add(0x10, Ordering::Relaxed);
    RawHandle::from_addr(NonZeroUsize::new(addr).unwrap())
}

pub(crate) fn fake_handle(capability: Capability) -> TaggedHandle {
    TaggedHandle::new(fake_raw(), capability)
}

struct Endpoint {
    name: String,
    port: Option<(PortKind, RawHandle)>,
}

struct MockParams {
    descriptors: Vec<ParamDescriptor>,
    data: Vec<u8>,
    kept: Vec<Allocations>,
}

struct MockFilter {
    inputs: Vec<RawHandle>,
    outputs: Vec<RawHandle>,
    params: Option<MockParams>,
}

#[derive(Default)]
struct MockDrawable {
    kind: Option<DrawableKind>,
    geometry: Geometry,
    visible: bool,
    name: Option<String>,
    layer: i32,
    color: Color,
}

const PTR: usize = std::mem::size_of::<*const u8>();

/// The parameter layout of the "expand" filter.
pub(crate) fn expand_layout() -> Vec<ParamDescriptor> {
    vec![
        ParamDescriptor::new("enable_automatic_shift", ParamType::Bool, 0, 4),
        ParamDescriptor::new("overlay_y_offset", ParamType::Int, 4, 4),
        ParamDescriptor::new("aspect", ParamType::Double, 8, 8),
        ParamDescriptor::new("centre_cut_out_mode", ParamType::Bool, 16, 4),
        ParamDescriptor::new("label", ParamType::String, 24, PTR),
        ParamDescriptor::new("version", ParamType::Int, 24 + PTR, 4).readonly(true),
    ]
}

#[derive(Default)]
pub(crate) struct MockBackend {
    destroyed: Mutex<Vec<TaggedHandle>>,
    fail: AtomicBool,
    reuse: Mutex<Option<RawHandle>>,
    endpoints: Mutex<HashMap<RawHandle, Endpoint>>,
    filters: Mutex<HashMap<RawHandle, MockFilter>>,
    wired: Mutex<HashMap<RawHandle, (PortKind, RawHandle)>>,
    queues: Mutex<HashMap<RawHandle, VecDeque<(RawHandle, RawEvent)>>>,
    drawables: Mutex<HashMap<RawHandle, MockDrawable>>,
}

impl MockBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every creation function fail.
    pub(crate) fn fail_allocations(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// Makes the next creation function hand out `raw` again.
    pub(crate) fn reuse_next(&self, raw: RawHandle) {
        *self.reuse.lock() = Some(raw);
    }

    fn allocate(&self) -> Option<RawHandle> {
        if self.fail.load(Ordering::Relaxed) {
            None
        } else {
            Some(self.reuse.lock().take().unwrap_or_else(fake_raw))
        }
    }

    pub(crate) fn destroyed(&self) -> Vec<TaggedHandle> {
        self.destroyed.lock().clone()
    }

    pub(crate) fn destroy_count(&self, handle: TaggedHandle) -> usize {
        self.destroyed.lock().iter().filter(|&&h| h == handle).count()
    }

    /// Queues an event on `queue`, returning the native event handle.
    pub(crate) fn push_event(&self, queue: RawHandle, event: RawEvent) -> RawHandle {
        let raw = fake_raw();
        self.queues
            .lock()
            .entry(queue)
            .or_default()
            .push_back((raw, event));
        raw
    }

    /// Detaches whatever `output` is wired to.
    pub(crate) fn unwire(&self, output: RawHandle) {
        self.wired.lock().remove(&output);
    }
}

impl Collaborator for MockBackend {
    fn destroy_resource(&self, handle: TaggedHandle) {
        self.destroyed.lock().push(handle);
    }

    fn is_handle_live(&self, handle: TaggedHandle) -> bool {
        let port = handle.raw();
        self.wired.lock().values().any(|&(_, wired)| wired == port)
    }
}

// Pointer fields only ever point into `MockParams::kept`.
unsafe impl PipelineBackend for MockBackend {
    fn open_context(&self) -> Option<RawHandle> {
        self.allocate()
    }

    fn open_port(&self, _context: RawHandle, _kind: PortKind, _driver: &str) -> Option<RawHandle> {
        self.allocate()
    }

    fn open_stream(
        &self,
        _context: RawHandle,
        _audio: Option<RawHandle>,
        _video: Option<RawHandle>,
    ) -> Option<RawHandle> {
        self.allocate()
    }

    fn open_filter(
        &self,
        _context: RawHandle,
        name: &str,
        _audio_targets: &[RawHandle],
        video_targets: &[RawHandle],
    ) -> Option<RawHandle> {
        let filter = self.allocate()?;
        let input = fake_raw();
        let output = fake_raw();

        let mut endpoints = self.endpoints.lock();
        endpoints.insert(
            input,
            Endpoint {
                name: "video in".to_owned(),
                port: Some((PortKind::Video, fake_raw())),
            },
        );
        endpoints.insert(
            output,
            Endpoint {
                name: "video out".to_owned(),
                port: Some((
                    PortKind::Video,
                    video_targets.first().copied().unwrap_or_else(fake_raw),
                )),
            },
        );
        drop(endpoints);

        let params = (name == "expand").then(|| {
            let descriptors = expand_layout();
            let mut data = vec![0; 28 + PTR];
            data[4..8].copy_from_slice(&16i32.to_ne_bytes());
            data[8..16].copy_from_slice(&(4.0f64 / 3.0).to_ne_bytes());
            data[24 + PTR..28 + PTR].copy_from_slice(&2i32.to_ne_bytes());
            MockParams {
                descriptors,
                data,
                kept: Vec::new(),
            }
        });

        self.filters.lock().insert(
            filter,
            MockFilter {
                inputs: vec![input],
                outputs: vec![output],
                params,
            },
        );
        Some(filter)
    }

    fn filter_inputs(&self, filter: RawHandle) -> Vec<RawHandle> {
        self.filters
            .lock()
            .get(&filter)
            .map(|f| f.inputs.clone())
            .unwrap_or_default()
    }

    fn filter_outputs(&self, filter: RawHandle) -> Vec<RawHandle> {
        self.filters
            .lock()
            .get(&filter)
            .map(|f| f.outputs.clone())
            .unwrap_or_default()
    }

    fn endpoint_name(&self, endpoint: RawHandle) -> String {
        self.endpoints
            .lock()
            .get(&endpoint)
            .map(|e| e.name.clone())
            .unwrap_or_default()
    }

    fn input_port(&self, input: RawHandle) -> Option<(PortKind, RawHandle)> {
        self.endpoints.lock().get(&input).and_then(|e| e.port)
    }

    fn output_port(&self, output: RawHandle) -> Option<(PortKind, RawHandle)> {
        if let Some(&wired) = self.wired.lock().get(&output) {
            return Some(wired);
        }
        self.endpoints.lock().get(&output).and_then(|e| e.port)
    }

    fn wire(&self, output: RawHandle, kind: PortKind, port: RawHandle) -> bool {
        if !self.endpoints.lock().contains_key(&output) {
            return false;
        }
        self.wired.lock().insert(output, (kind, port));
        true
    }

    fn new_event_queue(&self, _stream: RawHandle) -> Option<RawHandle> {
        let queue = self.allocate()?;
        self.queues.lock().insert(queue, VecDeque::new());
        Some(queue)
    }

    fn next_event(&self, queue: RawHandle) -> Option<(RawHandle, RawEvent)> {
        self.queues.lock().get_mut(&queue)?.pop_front()
    }

    fn parameter_descriptors(&self, filter: RawHandle) -> Option<Vec<ParamDescriptor>> {
        let filters = self.filters.lock();
        filters.get(&filter)?.params.as_ref().map(|p| p.descriptors.clone())
    }

    fn parameter_block_size(&self, filter: RawHandle) -> usize {
        self.filters
            .lock()
            .get(&filter)
            .and_then(|f| f.params.as_ref())
            .map_or(0, |p| p.data.len())
    }

    fn get_parameters(&self, filter: RawHandle, block: &mut ParamBlock) -> bool {
        let filters = self.filters.lock();
        match filters.get(&filter).and_then(|f| f.params.as_ref()) {
            Some(params) if params.data.len() == block.len() => {
                unsafe { block.as_mut_bytes() }.copy_from_slice(&params.data);
                true
            }
            _ => false,
        }
    }

    fn set_parameters(&self, filter: RawHandle, block: &mut ParamBlock) -> bool {
        let mut filters = self.filters.lock();
        match filters.get_mut(&filter).and_then(|f| f.params.as_mut()) {
            Some(params) if params.data.len() == block.len() => {
                params.data.copy_from_slice(block.as_bytes());
                params.kept.push(block.take_allocations());
                true
            }
            _ => false,
        }
    }
}

impl CanvasBackend for MockBackend {
    fn new_canvas(&self, _display: Option<RawHandle>) -> Option<RawHandle> {
        self.allocate()
    }

    fn new_drawable(&self, _canvas: RawHandle, kind: DrawableKind) -> Option<RawHandle> {
        let raw = self.allocate()?;
        self.drawables.lock().insert(
            raw,
            MockDrawable {
                kind: Some(kind),
                ..MockDrawable::default()
            },
        );
        Some(raw)
    }

    fn move_to(&self, drawable: RawHandle, x: i32, y: i32) {
        let mut drawables = self.drawables.lock();
        let geometry = &mut drawables.entry(drawable).or_default().geometry;
        geometry.x = x;
        geometry.y = y;
    }

    fn resize(&self, drawable: RawHandle, width: i32, height: i32) {
        let mut drawables = self.drawables.lock();
        let geometry = &mut drawables.entry(drawable).or_default().geometry;
        geometry.width = width;
        geometry.height = height;
    }

    fn set_visible(&self, drawable: RawHandle, visible: bool) {
        self.drawables.lock().entry(drawable).or_default().visible = visible;
    }

    fn is_visible(&self, drawable: RawHandle) -> bool {
        self.drawables
            .lock()
            .get(&drawable)
            .is_some_and(|d| d.visible)
    }

    fn geometry(&self, drawable: RawHandle) -> Geometry {
        self.drawables
            .lock()
            .get(&drawable)
            .map(|d| d.geometry)
            .unwrap_or_default()
    }

    fn set_name(&self, drawable: RawHandle, name: &str) {
        self.drawables.lock().entry(drawable).or_default().name = Some(name.to_owned());
    }

    fn name(&self, drawable: RawHandle) -> Option<String> {
        self.drawables.lock().get(&drawable)?.name.clone()
    }

    fn set_layer(&self, drawable: RawHandle, layer: i32) {
        self.drawables.lock().entry(drawable).or_default().layer = layer;
    }

    fn layer(&self, drawable: RawHandle) -> i32 {
        self.drawables.lock().get(&drawable).map_or(0, |d| d.layer)
    }

    fn set_color(&self, drawable: RawHandle, color: Color) {
        self.drawables.lock().entry(drawable).or_default().color = color;
    }

    fn color(&self, drawable: RawHandle) -> Color {
        self.drawables
            .lock()
            .get(&drawable)
            .map(|d| d.color)
            .unwrap_or_default()
    }

    fn kind_name(&self, drawable: RawHandle) -> String {
        match self.drawables.lock().get(&drawable).and_then(|d| d.kind) {
            Some(DrawableKind::Rectangle) => "rectangle",
            Some(DrawableKind::Image) => "image",
            Some(DrawableKind::Text) => "text",
            Some(DrawableKind::Line) => "line",
            Some(DrawableKind::Polygon) => "polygon",
            Some(DrawableKind::Gradient) => "gradient",
            None => "unknown",
        }
        .to_owned()
    }
}

impl DisplayBackend for MockBackend {
    fn open_display(&self, _name: Option<&str>) -> Option<RawHandle> {
        self.allocate()
    }

    fn connection_number(&self, display: RawHandle) -> i32 {
        (display.addr() % 1000) as i32
    }
}

/// A plain registered wrapper holding arbitrary edges.
#[derive(Traverse)]
pub(crate) struct Node {
    #[traverse]
    ownership: Ownership,
    #[traverse]
    pub(crate) peers: SlotList<dyn Traverse>,
}

impl Wrapper for Node {
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Node {
    pub(crate) fn find_or_create(
        handle: TaggedHandle,
        owner: Option<Arc<dyn Wrapper>>,
        policy: OwnerPolicy,
        disposes: bool,
        mock: &Arc<MockBackend>,
    ) -> BridgeResult<Arc<Self>> {
        registry::find_or_create(handle, disposes, |registration| {
            Self::build(registration, owner, policy, mock)
        })
    }

    pub(crate) fn build(
        registration: Registration,
        owner: Option<Arc<dyn Wrapper>>,
        policy: OwnerPolicy,
        mock: &Arc<MockBackend>,
    ) -> BridgeResult<Self> {
        let collaborator: Arc<dyn Collaborator> = mock.clone();
        Ok(Self {
            ownership: Ownership::new(registration, owner, policy, collaborator)?,
            peers: SlotList::default(),
        })
    }

    /// A top-level node that disposes its handle.
    pub(crate) fn root(mock: &Arc<MockBackend>) -> Arc<Self> {
        Self::find_or_create(
            fake_handle(Capability::CONTEXT),
            None,
            OwnerPolicy::NONE,
            true,
            mock,
        )
        .unwrap()
    }
}

/// Another wrapper type, for kind mismatches.
#[derive(Traverse)]
pub(crate) struct Leaf {
    #[traverse]
    ownership: Ownership,
}

impl Wrapper for Leaf {
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Leaf {
    pub(crate) fn find_or_create(
        handle: TaggedHandle,
        mock: &Arc<MockBackend>,
    ) -> BridgeResult<Arc<Self>> {
        let collaborator: Arc<dyn Collaborator> = mock.clone();
        registry::find_or_create(handle, false, |registration| {
            Ok(Self {
                ownership: Ownership::new(registration, None, OwnerPolicy::NONE, collaborator)?,
            })
        })
    }
}
