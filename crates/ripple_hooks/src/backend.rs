//! Storage seen by a transaction.
//!
//! [`Backend`] is the seam between the hook engine and actual storage. The
//! engine only needs entity and relation CRUD plus commit and rollback;
//! [`MemoryBackend`] implements it over a shared [`MemoryStore`] and is what
//! tests and embedders without a database use.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::entity::{Attributes, Eid, Entity, Role};

/// Error returned by storage calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The entity does not exist.
    #[error("unknown entity {0}")]
    UnknownEntity(Eid),
    /// The entity already exists.
    #[error("entity {0} already exists")]
    DuplicateEntity(Eid),
    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Transactional entity/relation storage.
pub trait Backend: Send {
    /// Reserves a fresh entity id.
    fn allocate_eid(&mut self) -> Eid;

    /// Returns an entity with its stored attributes.
    fn entity(&self, eid: Eid) -> Option<Entity>;

    /// Returns an entity's type.
    fn entity_type(&self, eid: Eid) -> Option<String> {
        self.entity(eid).map(|entity| entity.etype().to_string())
    }

    /// Stores a new entity.
    ///
    /// # Errors
    ///
    /// Fails if the id is taken or storage fails.
    fn insert_entity(&mut self, entity: &Entity) -> Result<(), BackendError>;

    /// Merges edited attributes into a stored entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist or storage fails.
    fn update_entity(&mut self, eid: Eid, attrs: &Attributes) -> Result<(), BackendError>;

    /// Deletes an entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist or storage fails.
    fn delete_entity(&mut self, eid: Eid) -> Result<(), BackendError>;

    /// Adds a relation; returns false if it already existed.
    ///
    /// # Errors
    ///
    /// Fails if either end does not exist or storage fails.
    fn add_relation(&mut self, eidfrom: Eid, rtype: &str, eidto: Eid) -> Result<bool, BackendError>;

    /// Deletes a relation; returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Fails if storage fails.
    fn delete_relation(
        &mut self,
        eidfrom: Eid,
        rtype: &str,
        eidto: Eid,
    ) -> Result<bool, BackendError>;

    /// Returns true if the relation exists.
    fn has_relation(&self, eidfrom: Eid, rtype: &str, eidto: Eid) -> bool;

    /// Returns the entities related to `eid` through `rtype`, `eid` playing
    /// `role`.
    fn related(&self, eid: Eid, rtype: &str, role: Role) -> Vec<Eid>;

    /// Returns every relation `eid` takes part in, as `(eidfrom, rtype, eidto)`.
    fn relations_of(&self, eid: Eid) -> Vec<(Eid, String, Eid)>;

    /// Makes the transaction's writes durable.
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction uncommitted.
    fn commit(&mut self) -> Result<(), BackendError>;

    /// Discards the transaction's writes.
    ///
    /// # Errors
    ///
    /// Fails if storage fails.
    fn rollback(&mut self) -> Result<(), BackendError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

type Relation = (Eid, String, Eid);

#[derive(Debug, Clone, Default)]
struct Snapshot {
    entities: BTreeMap<Eid, Entity>,
    relations: BTreeSet<Relation>,
}

/// Writes staged by one backend, applied to the shared snapshot on commit.
///
/// An entity maps to its final state, `None` meaning deleted. A relation
/// maps to `true` when added and `false` when removed.
#[derive(Debug, Default)]
struct Changes {
    entities: BTreeMap<Eid, Option<Entity>>,
    relations: BTreeMap<Relation, bool>,
}

impl Changes {
    fn apply(self, target: &mut Snapshot) {
        for (eid, entity) in self.entities {
            match entity {
                Some(entity) => {
                    target.entities.insert(eid, entity);
                }
                None => {
                    target.entities.remove(&eid);
                    target
                        .relations
                        .retain(|(from, _, to)| *from != eid && *to != eid);
                }
            }
        }
        for (relation, added) in self.relations {
            let (from, _, to) = &relation;
            if !added {
                target.relations.remove(&relation);
            } else if target.entities.contains_key(from) && target.entities.contains_key(to) {
                target.relations.insert(relation);
            }
        }
    }
}

/// Committed state shared by every [`MemoryBackend`] opened on it.
///
/// Cloning is cheap and shares the state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<RwLock<Snapshot>>,
    next_eid: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a backend working on a copy of the committed state.
    #[must_use]
    pub fn begin(&self) -> MemoryBackend {
        MemoryBackend {
            store: self.clone(),
            working: self.committed.read().clone(),
            changes: Changes::default(),
        }
    }

    /// Returns a committed entity.
    #[must_use]
    pub fn entity(&self, eid: Eid) -> Option<Entity> {
        self.committed.read().entities.get(&eid).cloned()
    }

    /// Returns true if the relation is committed.
    #[must_use]
    pub fn has_relation(&self, eidfrom: Eid, rtype: &str, eidto: Eid) -> bool {
        self.committed
            .read()
            .relations
            .contains(&(eidfrom, rtype.to_string(), eidto))
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.committed.read().entities.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryBackend
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory [`Backend`].
///
/// Writes go to a working copy and are recorded as changes; commit applies
/// only those changes to the store, so transactions committing one after
/// the other keep each other's writes.
#[derive(Debug)]
pub struct MemoryBackend {
    store: MemoryStore,
    working: Snapshot,
    changes: Changes,
}

impl MemoryBackend {
    fn require(&self, eid: Eid) -> Result<(), BackendError> {
        if self.working.entities.contains_key(&eid) {
            Ok(())
        } else {
            Err(BackendError::UnknownEntity(eid))
        }
    }
}

impl Backend for MemoryBackend {
    fn allocate_eid(&mut self) -> Eid {
        Eid(self.store.next_eid.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn entity(&self, eid: Eid) -> Option<Entity> {
        self.working.entities.get(&eid).cloned()
    }

    fn entity_type(&self, eid: Eid) -> Option<String> {
        self.working
            .entities
            .get(&eid)
            .map(|entity| entity.etype().to_string())
    }

    fn insert_entity(&mut self, entity: &Entity) -> Result<(), BackendError> {
        if self.working.entities.contains_key(&entity.eid()) {
            return Err(BackendError::DuplicateEntity(entity.eid()));
        }
        self.working.entities.insert(entity.eid(), entity.clone());
        self.changes.entities.insert(entity.eid(), Some(entity.clone()));
        Ok(())
    }

    fn update_entity(&mut self, eid: Eid, attrs: &Attributes) -> Result<(), BackendError> {
        let entity = self
            .working
            .entities
            .get_mut(&eid)
            .ok_or(BackendError::UnknownEntity(eid))?;
        for (name, value) in attrs {
            entity.set(name.clone(), value.clone());
        }
        self.changes.entities.insert(eid, Some(entity.clone()));
        Ok(())
    }

    fn delete_entity(&mut self, eid: Eid) -> Result<(), BackendError> {
        self.working
            .entities
            .remove(&eid)
            .ok_or(BackendError::UnknownEntity(eid))?;
        self.working
            .relations
            .retain(|(from, _, to)| *from != eid && *to != eid);
        self.changes
            .relations
            .retain(|(from, _, to), _| *from != eid && *to != eid);
        self.changes.entities.insert(eid, None);
        Ok(())
    }

    fn add_relation(&mut self, eidfrom: Eid, rtype: &str, eidto: Eid) -> Result<bool, BackendError> {
        self.require(eidfrom)?;
        self.require(eidto)?;
        let relation = (eidfrom, rtype.to_string(), eidto);
        let added = self.working.relations.insert(relation.clone());
        if added {
            self.changes.relations.insert(relation, true);
        }
        Ok(added)
    }

    fn delete_relation(
        &mut self,
        eidfrom: Eid,
        rtype: &str,
        eidto: Eid,
    ) -> Result<bool, BackendError> {
        let relation = (eidfrom, rtype.to_string(), eidto);
        let removed = self.working.relations.remove(&relation);
        if removed {
            self.changes.relations.insert(relation, false);
        }
        Ok(removed)
    }

    fn has_relation(&self, eidfrom: Eid, rtype: &str, eidto: Eid) -> bool {
        self.working
            .relations
            .contains(&(eidfrom, rtype.to_string(), eidto))
    }

    fn related(&self, eid: Eid, rtype: &str, role: Role) -> Vec<Eid> {
        self.working
            .relations
            .iter()
            .filter(|(_, r, _)| r == rtype)
            .filter_map(|(from, _, to)| match role {
                Role::Subject if *from == eid => Some(*to),
                Role::Object if *to == eid => Some(*from),
                _ => None,
            })
            .collect()
    }

    fn relations_of(&self, eid: Eid) -> Vec<(Eid, String, Eid)> {
        self.working
            .relations
            .iter()
            .filter(|(from, _, to)| *from == eid || *to == eid)
            .cloned()
            .collect()
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        let changes = core::mem::take(&mut self.changes);
        let mut committed = self.store.committed.write();
        changes.apply(&mut committed);
        self.working = committed.clone();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        self.changes = Changes::default();
        self.working = self.store.committed.read().clone();
        Ok(())
    }
}
