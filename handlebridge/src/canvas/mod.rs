//! Scene canvases and the drawables on them.
//!
//! A [`Canvas`] is unique per native handle. A [`Drawable`] is a shared-reference wrapper: the
//! same native object may be wrapped any number of times, all wrappers see the same attributes,
//! and the object is deleted when the last wrapper goes away.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::display::Display;
use crate::errors::{BridgeError, BridgeResult};
use crate::gc;
use crate::handle::{Capability, RawHandle, TaggedHandle};
use crate::ownership::{self, Collaborator, OwnerPolicy, Ownership, Wrapper};
use crate::registry;
use crate::shared::{AttrValue, SharedRef};
use crate::Traverse;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawableKind {
    Rectangle,
    Image,
    Text,
    Line,
    Polygon,
    Gradient,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// The native scene library.
pub trait CanvasBackend: Collaborator {
    /// Creates a canvas, drawing to `display` if given. `None` on failure.
    fn new_canvas(&self, display: Option<RawHandle>) -> Option<RawHandle>;

    fn new_drawable(&self, canvas: RawHandle, kind: DrawableKind) -> Option<RawHandle>;

    fn move_to(&self, drawable: RawHandle, x: i32, y: i32);

    fn resize(&self, drawable: RawHandle, width: i32, height: i32);

    fn set_visible(&self, drawable: RawHandle, visible: bool);

    fn is_visible(&self, drawable: RawHandle) -> bool;

    fn geometry(&self, drawable: RawHandle) -> Geometry;

    fn set_name(&self, drawable: RawHandle, name: &str);

    fn name(&self, drawable: RawHandle) -> Option<String>;

    fn set_layer(&self, drawable: RawHandle, layer: i32);

    fn layer(&self, drawable: RawHandle) -> i32;

    fn set_color(&self, drawable: RawHandle, color: Color);

    fn color(&self, drawable: RawHandle) -> Color;

    /// The library's name for the type of the drawable.
    fn kind_name(&self, drawable: RawHandle) -> String;
}

/// Shared reference to a canvas backend.
#[derive(Clone)]
pub struct Backend {
    api: Arc<dyn CanvasBackend>,
    collaborator: Arc<dyn Collaborator>,
}

impl Backend {
    pub fn new<B: CanvasBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            collaborator: backend.clone(),
            api: backend,
        }
    }
}

/// A scene canvas.
#[derive(Traverse)]
pub struct Canvas {
    #[traverse]
    ownership: Ownership,
    backend: Backend,
}

impl Wrapper for Canvas {
    #[inline]
    fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

impl Canvas {
    const OWNERS: OwnerPolicy = OwnerPolicy::optional(Capability::DISPLAY);

    /// Creates a canvas, drawing to `display` if given.
    pub fn new(backend: &Backend, display: Option<&Arc<Display>>) -> BridgeResult<Arc<Self>> {
        let raw = backend
            .api
            .new_canvas(display.map(|d| d.handle().raw()))
            .ok_or_else(|| BridgeError::Allocation("canvas".to_owned()))?;
        let owner = display.map(|d| d.clone() as Arc<dyn Wrapper>);
        ownership::destroy_unwrapped(
            &*backend.collaborator,
            TaggedHandle::new(raw, Capability::CANVAS),
            Self::from_handle(backend, raw, owner, true),
        )
    }

    /// Returns the wrapper of an existing canvas.
    pub fn from_handle(
        backend: &Backend,
        raw: RawHandle,
        owner: Option<Arc<dyn Wrapper>>,
        disposes: bool,
    ) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::CANVAS);
        registry::find_or_create(handle, disposes, |registration| {
            Ok(Self {
                ownership: Ownership::new(
                    registration,
                    owner,
                    Self::OWNERS,
                    backend.collaborator.clone(),
                )?,
                backend: backend.clone(),
            })
        })
    }

    /// The display this canvas draws to.
    pub fn display(&self) -> Option<Arc<Display>> {
        let owner = self.ownership.owner()?;
        registry::lookup_as::<Display>(owner.handle())
    }

    /// Creates a drawable on this canvas.
    pub fn new_drawable(self: &Arc<Self>, kind: DrawableKind) -> BridgeResult<Arc<Drawable>> {
        let raw = self
            .backend
            .api
            .new_drawable(self.handle().raw(), kind)
            .ok_or_else(|| BridgeError::Allocation(format!("{:?} drawable", kind)))?;
        ownership::destroy_unwrapped(
            &*self.backend.collaborator,
            TaggedHandle::new(raw, Capability::DRAWABLE),
            Drawable::wrap(self, raw),
        )
    }
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("handle", &self.handle())
            .finish()
    }
}

/// One wrapper of a drawable object.
#[derive(Traverse)]
pub struct Drawable {
    #[traverse]
    shared: SharedRef,
    backend: Backend,
}

impl Drawable {
    const OWNERS: OwnerPolicy = OwnerPolicy::required(Capability::CANVAS);

    /// Creates a new wrapper of the drawable `raw` of `canvas`.
    pub fn wrap(canvas: &Arc<Canvas>, raw: RawHandle) -> BridgeResult<Arc<Self>> {
        let handle = TaggedHandle::new(raw, Capability::DRAWABLE);
        Self::OWNERS.validate(Capability::DRAWABLE, Some(canvas.handle().capability()))?;

        let backend = canvas.backend.clone();
        let shared = SharedRef::wrap(
            handle,
            Some(canvas.clone()),
            backend.collaborator.clone(),
        )?;
        let drawable = Arc::new(Self { shared, backend });
        gc::track(&drawable);
        Ok(drawable)
    }

    #[inline]
    pub fn handle(&self) -> TaggedHandle {
        self.shared.handle()
    }

    #[inline]
    fn raw(&self) -> RawHandle {
        self.shared.handle().raw()
    }

    /// Number of live wrappers of this drawable.
    #[inline]
    pub fn alias_count(&self) -> usize {
        self.shared.alias_count()
    }

    /// The canvas recorded by the first wrapper.
    pub fn canvas(&self) -> Option<Arc<Canvas>> {
        let owner = self.shared.owner()?;
        registry::lookup_as::<Canvas>(owner.handle())
    }

    pub fn move_to(&self, x: i32, y: i32) {
        self.backend.api.move_to(self.raw(), x, y)
    }

    pub fn resize(&self, width: i32, height: i32) {
        self.backend.api.resize(self.raw(), width, height)
    }

    pub fn show(&self) {
        self.backend.api.set_visible(self.raw(), true)
    }

    pub fn hide(&self) {
        self.backend.api.set_visible(self.raw(), false)
    }

    pub fn is_visible(&self) -> bool {
        self.backend.api.is_visible(self.raw())
    }

    pub fn geometry(&self) -> Geometry {
        self.backend.api.geometry(self.raw())
    }

    pub fn set_name(&self, name: &str) {
        self.backend.api.set_name(self.raw(), name)
    }

    pub fn name(&self) -> Option<String> {
        self.backend.api.name(self.raw())
    }

    pub fn set_layer(&self, layer: i32) {
        self.backend.api.set_layer(self.raw(), layer)
    }

    pub fn layer(&self) -> i32 {
        self.backend.api.layer(self.raw())
    }

    pub fn set_color(&self, color: Color) {
        self.backend.api.set_color(self.raw(), color)
    }

    pub fn color(&self) -> Color {
        self.backend.api.color(self.raw())
    }

    pub fn kind_name(&self) -> String {
        self.backend.api.kind_name(self.raw())
    }

    /// Returns the attribute `name`, shared by every wrapper of this drawable.
    #[inline]
    pub fn get_attr(&self, name: &str) -> Option<AttrValue> {
        self.shared.get_attr(name)
    }

    /// Stores the attribute `name`, or deletes it when `value` is `None`.
    #[inline]
    pub fn set_attr(&self, name: &str, value: Option<AttrValue>) {
        self.shared.set_attr(name, value)
    }

    pub fn attr_names(&self) -> Vec<String> {
        self.shared.attr_names()
    }
}

/// Wrappers are equal when they wrap the same native object.
impl PartialEq for Drawable {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle()
    }
}

impl Eq for Drawable {}

impl Hash for Drawable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle().hash(state)
    }
}

impl fmt::Debug for Drawable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drawable")
            .field("handle", &self.handle())
            .finish()
    }
}
