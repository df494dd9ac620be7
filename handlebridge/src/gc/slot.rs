use parking_lot::Mutex;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use super::{Trace, Traced, Visit};

/// A strong reference that a collector can see and clear.
pub struct Slot<T: ?Sized> {
    inner: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> Slot<T> {
    #[inline]
    pub fn new(value: Option<Arc<T>>) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    #[inline]
    pub fn empty() -> Self {
        Self::new(None)
    }

    /// Returns a new strong reference to the held value.
    #[inline]
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.lock().clone()
    }

    /// Replaces the held value, returning the previous one.
    #[inline]
    pub fn replace(&self, value: Option<Arc<T>>) -> Option<Arc<T>> {
        std::mem::replace(&mut *self.inner.lock(), value)
    }

    #[inline]
    pub fn take(&self) -> Option<Arc<T>> {
        self.inner.lock().take()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.lock() {
            Some(value) => write!(f, "Slot({:#x})", Traced::of(value).addr()),
            None => write!(f, "Slot(empty)"),
        }
    }
}

impl<T: ?Sized> Trace for Slot<T> {
    fn trace(&self, visit: &mut Visit<'_>) -> ControlFlow<()> {
        let target = self.inner.lock().as_ref().map(Traced::of);
        match target {
            Some(target) => visit(target),
            None => ControlFlow::Continue(()),
        }
    }

    fn untrace(&self) {
        // Released outside the lock, the drop may run arbitrary destructors.
        let released = self.take();
        drop(released);
    }
}

/// An ordered list of strong references that a collector can see and clear.
pub struct SlotList<T: ?Sized> {
    inner: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> SlotList<T> {
    #[inline]
    pub fn new(values: Vec<Arc<T>>) -> Self {
        Self {
            inner: Mutex::new(values),
        }
    }

    /// Returns new strong references to every held value.
    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.inner.lock().clone()
    }

    pub fn push(&self, value: Arc<T>) {
        self.inner.lock().push(value);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: ?Sized> Default for SlotList<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: ?Sized> fmt::Debug for SlotList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotList(len = {})", self.len())
    }
}

impl<T: ?Sized> Trace for SlotList<T> {
    fn trace(&self, visit: &mut Visit<'_>) -> ControlFlow<()> {
        let targets: Vec<Traced> = self.inner.lock().iter().map(Traced::of).collect();
        for target in targets {
            if visit(target).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn untrace(&self) {
        let released = std::mem::take(&mut *self.inner.lock());
        drop(released);
    }
}
