//! Native handles and the capability tags attached to them.

use bitflags::bitflags;
use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

/// An opaque native handle.
///
/// The bridge never dereferences the pointer, it is only used as a key into the
/// side tables kept on the host side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(NonNull<c_void>);

unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    /// Wraps `ptr`, returning `None` for a null pointer.
    #[inline]
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Builds a handle out of a plain address.
    ///
    /// Useful for libraries that hand out integer identifiers instead of pointers.
    #[inline]
    pub fn from_addr(addr: NonZeroUsize) -> Self {
        // The pointer is never dereferenced so its provenance doesn't matter.
        Self(unsafe { NonNull::new_unchecked(addr.get() as *mut c_void) })
    }

    /// Returns the underlying pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:p})", self.0)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

bitflags! {
    /// The binding subsystems a handle can belong to.
    ///
    /// A [`TaggedHandle`] carries exactly one of these bits. A set of them is used as an owner
    /// whitelist by [`OwnerPolicy`](crate::ownership::OwnerPolicy).
    #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Capability: u32 {
        /// Top level engine context
        const CONTEXT = 1 << 0;
        const STREAM = 1 << 1;
        /// Pipeline filter
        const FILTER = 1 << 2;
        const FILTER_INPUT = 1 << 3;
        const FILTER_OUTPUT = 1 << 4;
        const AUDIO_PORT = 1 << 5;
        const VIDEO_PORT = 1 << 6;
        const EVENT_QUEUE = 1 << 7;
        const EVENT = 1 << 8;
        /// Display connection
        const DISPLAY = 1 << 9;
        const CANVAS = 1 << 10;
        /// Scene object, wrapped through shared references
        const DRAWABLE = 1 << 11;
    }
}

impl Capability {
    /// Returns `true` if exactly one capability bit is set.
    #[inline]
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, "{}", name)?;
        }
        Ok(())
    }
}

/// A native handle paired with the subsystem that owns it.
///
/// Registry entries are keyed on the pair, so the same pointer value handed out by two
/// subsystems never collides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaggedHandle {
    raw: RawHandle,
    capability: Capability,
}

impl TaggedHandle {
    /// Tags `raw` with `capability`.
    ///
    /// # Panics
    /// Panics if `capability` doesn't have exactly one bit set.
    #[inline]
    pub fn new(raw: RawHandle, capability: Capability) -> Self {
        assert!(
            capability.is_single(),
            "a handle is tagged with exactly one capability, got {}",
            capability
        );
        Self { raw, capability }
    }

    #[inline]
    pub fn raw(self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn capability(self) -> Capability {
        self.capability
    }
}

impl fmt::Display for TaggedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.capability, self.raw)
    }
}
