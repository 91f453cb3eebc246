//! Per-transaction scratch storage.
//!
//! Hooks and operations use [`TransactionData`] to share state for the
//! lifetime of one transaction: bookkeeping flags, the id of the operation
//! collecting a batch, caches.

use core::any::{Any, TypeId};
use std::borrow::Cow;

use hashbrown::HashMap;

/// Key into [`TransactionData`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataKey {
    /// Keyed by a Rust type, typically an operation class.
    Type(TypeId),
    /// Keyed by name.
    Named(Cow<'static, str>),
}

impl DataKey {
    /// Returns the key for type `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        DataKey::Type(TypeId::of::<T>())
    }

    /// Returns a named key.
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        DataKey::Named(name.into())
    }
}

/// Heterogeneous map cleared when the transaction ends.
#[derive(Default)]
pub struct TransactionData {
    entries: HashMap<DataKey, Box<dyn Any + Send>>,
}

impl TransactionData {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one if it had the same type.
    pub fn insert<T: Any + Send>(&mut self, key: DataKey, value: T) -> Option<T> {
        self.entries
            .insert(key, Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns the value under `key` if it has type `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &DataKey) -> Option<&T> {
        self.entries.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns the value under `key` mutably if it has type `T`.
    pub fn get_mut<T: Any>(&mut self, key: &DataKey) -> Option<&mut T> {
        self.entries
            .get_mut(key)
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Removes and returns the value under `key` if it has type `T`.
    pub fn remove<T: Any>(&mut self, key: &DataKey) -> Option<T> {
        if !self.entries.get(key)?.is::<T>() {
            return None;
        }
        self.entries
            .remove(key)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Returns true if any value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &DataKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Raises a named boolean flag.
    pub fn set_flag(&mut self, name: impl Into<Cow<'static, str>>) {
        self.insert(DataKey::named(name), true);
    }

    /// Returns true if the named flag is raised.
    #[must_use]
    pub fn flag(&self, name: &'static str) -> bool {
        self.get::<bool>(&DataKey::named(name)).copied().unwrap_or(false)
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn typed_and_named_keys_are_distinct() {
        let mut data = TransactionData::new();
        data.insert(DataKey::of::<Marker>(), 7_u64);
        data.insert(DataKey::named("batch"), vec![1, 2, 3]);

        assert_eq!(data.get::<u64>(&DataKey::of::<Marker>()), Some(&7));
        assert_eq!(data.get::<Vec<i32>>(&DataKey::named("batch")).map(Vec::len), Some(3));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn wrong_type_reads_as_absent() {
        let mut data = TransactionData::new();
        data.insert(DataKey::named("count"), 1_u32);

        assert!(data.get::<String>(&DataKey::named("count")).is_none());
        assert!(data.remove::<String>(&DataKey::named("count")).is_none());
        assert!(data.contains(&DataKey::named("count")));
        assert_eq!(data.remove::<u32>(&DataKey::named("count")), Some(1));
        assert!(data.is_empty());
    }

    #[test]
    fn insert_returns_previous_value() {
        let mut data = TransactionData::new();
        assert_eq!(data.insert(DataKey::named("n"), 1_u8), None);
        assert_eq!(data.insert(DataKey::named("n"), 2_u8), Some(1));
        if let Some(n) = data.get_mut::<u8>(&DataKey::named("n")) {
            *n += 1;
        }
        assert_eq!(data.get::<u8>(&DataKey::named("n")), Some(&3));
    }

    #[test]
    fn flags_default_to_lowered() {
        let mut data = TransactionData::new();
        assert!(!data.flag("importing"));
        data.set_flag("importing");
        assert!(data.flag("importing"));
        data.clear();
        assert!(!data.flag("importing"));
    }
}
