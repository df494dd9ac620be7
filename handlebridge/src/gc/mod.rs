//! Cycle-safe reference graphs.
//!
//! Wrappers hold strong references to each other (a filter holds its target ports, a port holds
//! the output it is wired to, which holds the filter). Such cycles are invisible to `Arc`, so
//! every wrapper that keeps strong edges implements [`Traverse`], and a [`Collector`] uses the
//! reported edges to find groups of wrappers that are only kept alive by each other.

use parking_lot::{const_mutex, Mutex};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

mod slot;
pub use self::slot::{Slot, SlotList};


/// The callback handed to [`Traverse::traverse`].
///
/// Returning [`ControlFlow::Break`] stops the traversal, and the break is propagated to the
/// caller.
pub type Visit<'a> = dyn FnMut(Traced) -> ControlFlow<()> + 'a;

/// Identity of the target of one strong edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Traced {
    addr: usize,
}

impl Traced {
    /// Identifies the allocation `target` points to.
    #[inline]
    pub fn of<T: ?Sized>(target: &Arc<T>) -> Self {
        Self {
            addr: Arc::as_ptr(target) as *const () as usize,
        }
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.addr
    }
}

/// Operations a cycle collector needs from an object holding strong references.
///
/// Most implementations are generated with `#[derive(Traverse)]`.
pub trait Traverse: Send + Sync {
    /// Calls `visit` once per strong reference held directly by `self`.
    fn traverse(&self, visit: &mut Visit<'_>) -> ControlFlow<()>;

    /// Releases every strong reference held directly by `self`.
    ///
    /// This breaks reference counts only. It never destroys the native resource of `self`.
    fn clear(&self);
}

/// A field that holds strong edges.
pub trait Trace {
    fn trace(&self, visit: &mut Visit<'_>) -> ControlFlow<()>;

    /// Drops the edges held by this field.
    fn untrace(&self);
}

/// Summary of one [`Collector::collect`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Live objects looked at.
    pub examined: usize,
    /// Objects found to be reachable only from other tracked objects, and cleared.
    pub unreachable: usize,
}

const DEFAULT_THRESHOLD: usize = 1024;

/// A trial-deletion cycle collector.
///
/// Tracked objects are held weakly. `collect` subtracts the edges reported between tracked
/// objects from their strong counts; whatever is left is referenced from outside the tracked
/// set. Anything not reachable from such an object is garbage held up by cycles and gets
/// [`Traverse::clear`]ed.
pub struct Collector {
    tracked: Mutex<Vec<Weak<dyn Traverse>>>,
    threshold: AtomicUsize,
    since_prune: AtomicUsize,
}

impl Collector {
    pub const fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    /// Creates a collector that drops dead entries after every `threshold` calls to `track`.
    pub const fn with_threshold(threshold: usize) -> Self {
        Self {
            tracked: const_mutex(Vec::new()),
            threshold: AtomicUsize::new(threshold),
            since_prune: AtomicUsize::new(0),
        }
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.threshold.store(threshold.max(1), Ordering::Relaxed);
    }

    /// Starts tracking `object`.
    pub fn track<T: Traverse + 'static>(&self, object: &Arc<T>) {
        let weak: Weak<dyn Traverse> = Arc::downgrade(object) as Weak<dyn Traverse>;
        let mut tracked = self.tracked.lock();
        tracked.push(weak);

        let since = self.since_prune.fetch_add(1, Ordering::Relaxed) + 1;
        if since >= self.threshold.load(Ordering::Relaxed) {
            self.since_prune.store(0, Ordering::Relaxed);
            tracked.retain(|w| w.strong_count() > 0);
        }
    }

    /// Number of entries held, dead ones included.
    #[cfg(test)]
    pub(crate) fn entries(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Number of tracked objects that are still alive.
    pub fn tracked(&self) -> usize {
        self.tracked
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Finds and clears cyclic garbage among the tracked objects.
    pub fn collect(&self) -> CollectStats {
        let objects: Vec<Arc<dyn Traverse>> = {
            let mut tracked = self.tracked.lock();
            tracked.retain(|w| w.strong_count() > 0);
            tracked.iter().filter_map(Weak::upgrade).collect()
        };

        let index: HashMap<usize, usize> = objects
            .iter()
            .enumerate()
            .map(|(i, object)| (Traced::of(object).addr(), i))
            .collect();

        // The upgrade above holds one reference of its own.
        let mut refs: Vec<usize> = objects
            .iter()
            .map(|object| Arc::strong_count(object) - 1)
            .collect();

        for object in &objects {
            let _ = object.traverse(&mut |target: Traced| {
                if let Some(&i) = index.get(&target.addr()) {
                    refs[i] = refs[i].saturating_sub(1);
                }
                ControlFlow::Continue(())
            });
        }

        let mut reachable: Vec<bool> = refs.iter().map(|&r| r > 0).collect();
        let mut pending: Vec<usize> = (0..objects.len()).filter(|&i| reachable[i]).collect();
        while let Some(i) = pending.pop() {
            let _ = objects[i].traverse(&mut |target: Traced| {
                if let Some(&j) = index.get(&target.addr()) {
                    if !reachable[j] {
                        reachable[j] = true;
                        pending.push(j);
                    }
                }
                ControlFlow::Continue(())
            });
        }

        let mut stats = CollectStats {
            examined: objects.len(),
            unreachable: 0,
        };
        for (object, _) in objects.iter().zip(&reachable).filter(|(_, r)| !**r) {
            object.clear();
            stats.unreachable += 1;
        }

        log::debug!(
            "collected {} of {} tracked objects",
            stats.unreachable,
            stats.examined
        );
        // Dropping the upgraded references releases the cleared objects. Newest first, so
        // dependents go before their owners.
        let mut objects = objects;
        while let Some(object) = objects.pop() {
            drop(object);
        }
        stats
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Collector = Collector::new();

/// The process-wide collector every registered wrapper is tracked with.
#[inline]
pub fn collector() -> &'static Collector {
    &GLOBAL
}

/// Tracks `object` with the process-wide collector.
#[inline]
pub fn track<T: Traverse + 'static>(object: &Arc<T>) {
    GLOBAL.track(object)
}

/// Runs the process-wide collector.
#[inline]
pub fn collect() -> CollectStats {
    GLOBAL.collect()
}

pub fn set_threshold(threshold: usize) {
    GLOBAL.set_threshold(threshold)
}
