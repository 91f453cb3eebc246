//! Operations that accumulate data across hook calls.
//!
//! A [`DataOperation`] is queued at most once per transaction: the first
//! hook needing it creates and registers it, later hooks find it again
//! through [`DataOperation::get_instance`] and add their items to its
//! [`BatchPayload`]. When the operation runs it drains the payload with
//! [`DataOperation::get_data`] and handles the whole batch at once.
//!
//! ```
//! use ripple_hooks::batch::{BatchPayload, DataOperation};
//! use ripple_hooks::operation::Operation;
//!
//! #[derive(Default)]
//! struct ReindexOp {
//!     eids: BatchPayload<u64>,
//! }
//!
//! impl Operation for ReindexOp {}
//!
//! impl DataOperation for ReindexOp {
//!     type Item = u64;
//!
//!     fn payload(&self) -> &BatchPayload<u64> {
//!         &self.eids
//!     }
//!
//!     fn payload_mut(&mut self) -> &mut BatchPayload<u64> {
//!         &mut self.eids
//!     }
//! }
//! ```

use core::hash::Hash;

use indexmap::IndexSet;

use crate::data::DataKey;
use crate::operation::{Operation, OperationId};
use crate::transaction::Transaction;

/// Error returned by batch payload accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataOperationError {
    /// The payload was already drained by [`DataOperation::get_data`].
    #[error("operation data was already consumed")]
    AlreadyDrained,
    /// The operation could not be found in the queue after registering it.
    #[error("operation '{0}' is not queued")]
    NotQueued(&'static str),
}

// ─────────────────────────────────────────────────────────────────────────────
// Container
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulated items, deduplicated or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container<T: Hash + Eq> {
    /// Deduplicated, in first-insertion order.
    Set(IndexSet<T>),
    /// Every item, in insertion order.
    List(Vec<T>),
}

impl<T: Hash + Eq> Container<T> {
    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Container::Set(set) => set.len(),
            Container::List(list) => list.len(),
        }
    }

    /// Returns true if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `value` was accumulated.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        match self {
            Container::Set(set) => set.contains(value),
            Container::List(list) => list.contains(value),
        }
    }

    /// Iterates items in insertion order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Container::Set(set) => Box::new(set.iter()),
            Container::List(list) => Box::new(list.iter()),
        }
    }

    /// Converts into a vector, in insertion order.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Container::Set(set) => set.into_iter().collect(),
            Container::List(list) => list,
        }
    }
}

impl<T: Hash + Eq> IntoIterator for Container<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchPayload
// ─────────────────────────────────────────────────────────────────────────────

/// The data a [`DataOperation`] accumulates, until drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPayload<T: Hash + Eq> {
    container: Option<Container<T>>,
}

impl<T: Hash + Eq> Default for BatchPayload<T> {
    fn default() -> Self {
        Self::set()
    }
}

impl<T: Hash + Eq> BatchPayload<T> {
    /// Creates a deduplicating payload.
    #[must_use]
    pub fn set() -> Self {
        Self {
            container: Some(Container::Set(IndexSet::new())),
        }
    }

    /// Creates a payload keeping every item.
    #[must_use]
    pub fn list() -> Self {
        Self {
            container: Some(Container::List(Vec::new())),
        }
    }

    fn container_mut(&mut self) -> Result<&mut Container<T>, DataOperationError> {
        self.container
            .as_mut()
            .ok_or(DataOperationError::AlreadyDrained)
    }

    /// Adds one item.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] after a drain.
    pub fn add(&mut self, value: T) -> Result<(), DataOperationError> {
        match self.container_mut()? {
            Container::Set(set) => {
                set.insert(value);
            }
            Container::List(list) => list.push(value),
        }
        Ok(())
    }

    /// Adds several items.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] after a drain.
    pub fn union(&mut self, values: impl IntoIterator<Item = T>) -> Result<(), DataOperationError> {
        match self.container_mut()? {
            Container::Set(set) => set.extend(values),
            Container::List(list) => list.extend(values),
        }
        Ok(())
    }

    /// Removes an item, returning whether it was present. For lists only the
    /// first occurrence is removed.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] after a drain.
    pub fn remove(&mut self, value: &T) -> Result<bool, DataOperationError> {
        Ok(match self.container_mut()? {
            Container::Set(set) => set.shift_remove(value),
            Container::List(list) => match list.iter().position(|v| v == value) {
                Some(index) => {
                    list.remove(index);
                    true
                }
                None => false,
            },
        })
    }

    /// Takes the accumulated items.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] on a second drain.
    pub fn drain(&mut self) -> Result<Container<T>, DataOperationError> {
        self.container.take().ok_or(DataOperationError::AlreadyDrained)
    }

    /// Returns true once drained.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.container.is_none()
    }

    /// Returns the accumulated items without draining them.
    #[must_use]
    pub fn peek(&self) -> Option<&Container<T>> {
        self.container.as_ref()
    }

    /// Returns the number of accumulated items, zero once drained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.container.as_ref().map_or(0, Container::len)
    }

    /// Returns true if no item is accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DataOperation
// ─────────────────────────────────────────────────────────────────────────────

/// An operation queued once per transaction that batches items.
///
/// The queued instance is found through the transaction's scratch data,
/// under [`DataKey::of::<Self>()`](DataKey::of).
pub trait DataOperation: Operation + Sized {
    /// Type of the accumulated items.
    type Item: Hash + Eq + Send + 'static;

    /// Returns the payload.
    fn payload(&self) -> &BatchPayload<Self::Item>;

    /// Returns the payload mutably.
    fn payload_mut(&mut self) -> &mut BatchPayload<Self::Item>;

    /// Returns the queued instance, creating and queueing one with `make`
    /// if there is none.
    ///
    /// An instance that was taken out of the queue to run no longer counts:
    /// a hook fired while it runs gets a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::NotQueued`] if the new instance cannot
    /// be found after queueing it.
    fn get_instance(
        tx: &mut Transaction,
        make: impl FnOnce() -> Self,
    ) -> Result<&mut Self, DataOperationError> {
        let key = DataKey::of::<Self>();
        let queued = tx
            .transaction_data()
            .get::<OperationId>(&key)
            .copied()
            .filter(|id| tx.operation::<Self>(*id).is_some());
        let id = match queued {
            Some(id) => id,
            None => {
                let id = tx.add_operation(make());
                tx.transaction_data_mut().insert(key, id);
                id
            }
        };
        tx.operation_mut::<Self>(id)
            .ok_or(DataOperationError::NotQueued(core::any::type_name::<Self>()))
    }

    /// Adds `value` to the queued instance, creating it with `make` first if
    /// needed.
    ///
    /// # Errors
    ///
    /// Fails like [`get_instance`](Self::get_instance) and
    /// [`BatchPayload::add`].
    fn add_data_to(
        tx: &mut Transaction,
        make: impl FnOnce() -> Self,
        value: Self::Item,
    ) -> Result<(), DataOperationError> {
        Self::get_instance(tx, make)?.add_data(value)
    }

    /// Adds one item.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] after a drain.
    fn add_data(&mut self, value: Self::Item) -> Result<(), DataOperationError> {
        self.payload_mut().add(value)
    }

    /// Adds several items.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] after a drain.
    fn union(
        &mut self,
        values: impl IntoIterator<Item = Self::Item>,
    ) -> Result<(), DataOperationError> {
        self.payload_mut().union(values)
    }

    /// Removes one item.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] after a drain.
    fn remove_data(&mut self, value: &Self::Item) -> Result<bool, DataOperationError> {
        self.payload_mut().remove(value)
    }

    /// Drains the accumulated items and forgets the scratch entry pointing
    /// at this instance, so later hooks create a new one.
    ///
    /// # Errors
    ///
    /// Returns [`DataOperationError::AlreadyDrained`] on a second call.
    fn get_data(
        &mut self,
        tx: &mut Transaction,
    ) -> Result<Container<Self::Item>, DataOperationError> {
        let key = DataKey::of::<Self>();
        let points_elsewhere = tx
            .transaction_data()
            .get::<OperationId>(&key)
            .is_some_and(|id| tx.operation::<Self>(*id).is_some());
        if !points_elsewhere {
            tx.transaction_data_mut().remove::<OperationId>(&key);
        }
        self.payload_mut().drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_payload_deduplicates_in_order() {
        let mut payload = BatchPayload::set();
        payload.union([3, 1, 3, 2]).unwrap();
        payload.add(1).unwrap();
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.drain().unwrap().into_vec(), vec![3, 1, 2]);
    }

    #[test]
    fn list_payload_keeps_duplicates() {
        let mut payload = BatchPayload::list();
        payload.union(["a", "b", "a"]).unwrap();
        assert!(payload.remove(&"a").unwrap());
        assert!(!payload.remove(&"z").unwrap());
        assert_eq!(payload.drain().unwrap().into_vec(), vec!["b", "a"]);
    }

    #[test]
    fn writes_after_drain_fail() {
        let mut payload: BatchPayload<u32> = BatchPayload::default();
        payload.add(1).unwrap();
        let drained = payload.drain().unwrap();
        assert!(drained.contains(&1));
        assert!(payload.is_drained());
        assert_eq!(payload.add(2), Err(DataOperationError::AlreadyDrained));
        assert_eq!(payload.remove(&1), Err(DataOperationError::AlreadyDrained));
        assert_eq!(payload.drain(), Err(DataOperationError::AlreadyDrained));
        assert_eq!(payload.len(), 0);
    }
}
