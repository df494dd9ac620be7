use std::collections::btree_map::{self, BTreeMap};

use super::{InvalidKeyError, ParamError, ParamResult, ParamValue, Value};

/// The structured form of a native parameter block.
///
/// Keys follow the same rules as native parameter names: they start with an alphabetic
/// character or an underscore, and contain only alphanumeric characters and underscores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    entries: BTreeMap<String, ParamValue>,
}

impl ParamMap {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if the key is valid.
    pub fn is_key_valid(key: &str) -> Result<(), InvalidKeyError> {
        let mut chars = key.chars();

        let first = chars.next().ok_or(InvalidKeyError::EmptyKey)?;
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(InvalidKeyError::InvalidCharacter(0));
        }

        for (i, c) in chars.enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                return Err(InvalidKeyError::InvalidCharacter(i + 1));
            }
        }

        Ok(())
    }

    /// Retrieves a typed value from the map.
    #[inline]
    pub fn get<T: Value>(&self, key: &str) -> ParamResult<T> {
        T::get_from_map(self, key)
    }

    /// Stores a typed value, replacing any previous value under `key`.
    #[inline]
    pub fn set<T: Value>(&mut self, key: &str, x: &T) -> ParamResult<()> {
        T::store_in_map(self, key, x)
    }

    /// Retrieves the raw value stored under `key`.
    pub fn get_value(&self, key: &str) -> ParamResult<&ParamValue> {
        self.entries.get(key).ok_or(ParamError::KeyNotFound)
    }

    /// Stores a raw value, replacing any previous value under `key`.
    pub fn set_value(&mut self, key: &str, value: ParamValue) -> ParamResult<()> {
        ParamMap::is_key_valid(key)?;
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    // Native field names aren't held to the key rules.
    pub(crate) fn insert(&mut self, key: &str, value: ParamValue) {
        self.entries.insert(key.to_owned(), value);
    }

    /// Deletes the given key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.entries.remove(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of keys contained in the map.
    #[inline]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns an iterator over all keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ParamValue> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a ParamMap {
    type Item = (&'a String, &'a ParamValue);
    type IntoIter = btree_map::Iter<'a, String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
