//! The per-transaction operation queue.
//!
//! The queue is kept as three zones drained in order: ordinary operations,
//! late operations, then single-last operations. Within a zone operations
//! run in registration order. Single-last operations are keyed by type; a
//! newer instance replaces the queued one and moves to the end of the zone.

use core::any::TypeId;
use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::operation::{Operation, OperationId, OperationKind, Processed};

/// A queued operation and its commit bookkeeping.
pub struct OperationEntry {
    id: OperationId,
    kind: OperationKind,
    pub(crate) processed: Option<Processed>,
    pub(crate) failed: bool,
    pub(crate) op: Box<dyn Operation>,
}

impl OperationEntry {
    /// Returns the operation's id.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the zone the operation was queued in.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns the operation's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.op.name()
    }

    /// Returns the last commit phase the operation completed.
    #[must_use]
    pub fn processed(&self) -> Option<Processed> {
        self.processed
    }

    /// Returns true if the operation's precommit failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Returns the operation.
    #[must_use]
    pub fn operation(&self) -> &dyn Operation {
        &*self.op
    }
}

/// Ordered queue of pending operations.
#[derive(Default)]
pub struct PendingOperations {
    ordinary: VecDeque<OperationEntry>,
    late: VecDeque<OperationEntry>,
    single_last: IndexMap<TypeId, OperationEntry>,
    next_id: u64,
}

impl PendingOperations {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an operation in the zone its [`kind`](Operation::kind) names.
    ///
    /// For single-last operations, an already queued instance of the same
    /// type is removed and returned; the new one goes last.
    pub fn push(&mut self, op: Box<dyn Operation>) -> (OperationId, Option<Box<dyn Operation>>) {
        let id = OperationId(self.next_id);
        self.next_id += 1;
        let kind = op.kind();
        let type_id = (*op).as_any().type_id();
        let entry = OperationEntry {
            id,
            kind,
            processed: None,
            failed: false,
            op,
        };
        match kind {
            OperationKind::Ordinary => self.ordinary.push_back(entry),
            OperationKind::Late => self.late.push_back(entry),
            OperationKind::SingleLast => {
                let previous = self.single_last.shift_remove(&type_id);
                self.single_last.insert(type_id, entry);
                return (id, previous.map(|previous| previous.op));
            }
        }
        (id, None)
    }

    /// Takes the next operation to process.
    pub fn pop_front(&mut self) -> Option<OperationEntry> {
        self.ordinary
            .pop_front()
            .or_else(|| self.late.pop_front())
            .or_else(|| self.single_last.shift_remove_index(0).map(|(_, entry)| entry))
    }

    /// Takes every queued operation, in processing order.
    pub fn drain_all(&mut self) -> Vec<OperationEntry> {
        let mut all: Vec<OperationEntry> = self.ordinary.drain(..).collect();
        all.extend(self.late.drain(..));
        all.extend(self.single_last.drain(..).map(|(_, entry)| entry));
        all
    }

    /// Iterates queued operations in processing order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationEntry> {
        self.ordinary
            .iter()
            .chain(self.late.iter())
            .chain(self.single_last.values())
    }

    /// Returns the queued operation with this id.
    #[must_use]
    pub fn get(&self, id: OperationId) -> Option<&OperationEntry> {
        self.iter().find(|entry| entry.id == id)
    }

    /// Returns the queued operation with this id mutably.
    pub fn get_mut(&mut self, id: OperationId) -> Option<&mut OperationEntry> {
        self.ordinary
            .iter_mut()
            .chain(self.late.iter_mut())
            .chain(self.single_last.values_mut())
            .find(|entry| entry.id == id)
    }

    /// Returns true if an operation with this id is queued.
    #[must_use]
    pub fn contains(&self, id: OperationId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordinary.len() + self.late.len() + self.single_last.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued operation.
    pub fn clear(&mut self) {
        self.ordinary.clear();
        self.late.clear();
        self.single_last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(&'static str, OperationKind);
    impl Operation for Tagged {
        fn kind(&self) -> OperationKind {
            self.1
        }
        fn name(&self) -> &str {
            self.0
        }
    }

    struct Mail(&'static str);
    impl Operation for Mail {
        fn kind(&self) -> OperationKind {
            OperationKind::SingleLast
        }
        fn name(&self) -> &str {
            self.0
        }
    }

    fn names(queue: &PendingOperations) -> Vec<String> {
        queue.iter().map(|e| e.name().to_string()).collect()
    }

    #[test]
    fn zones_drain_in_order() {
        let mut queue = PendingOperations::new();
        queue.push(Box::new(Mail("mail")));
        queue.push(Box::new(Tagged("late", OperationKind::Late)));
        queue.push(Box::new(Tagged("first", OperationKind::Ordinary)));
        queue.push(Box::new(Tagged("second", OperationKind::Ordinary)));

        assert_eq!(names(&queue), vec!["first", "second", "late", "mail"]);

        let mut popped = Vec::new();
        while let Some(entry) = queue.pop_front() {
            popped.push(entry.name().to_string());
        }
        assert_eq!(popped, vec!["first", "second", "late", "mail"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn single_last_replacement_moves_last() {
        let mut queue = PendingOperations::new();
        let (first, _) = queue.push(Box::new(Mail("v1")));
        let (second, previous) = queue.push(Box::new(Mail("v2")));

        assert_ne!(first, second);
        let previous = previous.and_then(|op| op.downcast::<Mail>().ok());
        assert_eq!(previous.map(|m| m.0), Some("v1"));
        assert_eq!(queue.len(), 1);
        assert!(!queue.contains(first));
        assert!(queue.contains(second));

        queue.push(Box::new(Tagged("summary", OperationKind::SingleLast)));
        let (third, _) = queue.push(Box::new(Mail("v3")));
        let last = queue.iter().last().map(OperationEntry::id);
        assert_eq!(last, Some(third));
    }

    #[test]
    fn get_mut_finds_any_zone() {
        let mut queue = PendingOperations::new();
        queue.push(Box::new(Tagged("a", OperationKind::Ordinary)));
        let (late, _) = queue.push(Box::new(Tagged("b", OperationKind::Late)));

        let entry = queue.get_mut(late).map(|e| e.kind());
        assert_eq!(entry, Some(OperationKind::Late));
        assert_eq!(queue.drain_all().len(), 2);
        assert!(queue.get(late).is_none());
    }
}
