use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::gc::Traced;

/// A value stored in an attribute table.
pub type AttrValue = Arc<dyn Any + Send + Sync>;

/// Runtime attributes attached to a shared handle.
#[derive(Default)]
pub struct AttributeTable {
    entries: BTreeMap<String, AttrValue>,
}

impl AttributeTable {
    #[inline]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    /// Stores `value`, returning the value it replaced.
    #[inline]
    pub fn insert(&mut self, name: &str, value: AttrValue) -> Option<AttrValue> {
        self.entries.insert(name.to_owned(), value)
    }

    #[inline]
    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = Traced> + '_ {
        self.entries.values().map(Traced::of)
    }
}

impl fmt::Debug for AttributeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
