//! The transaction context hooks and operations run in.
//!
//! A [`Transaction`] owns a [`Backend`] connection, the queue of pending
//! [operations](crate::operation), scratch [`TransactionData`], and the
//! per-transaction hook state: which categories are active, the pruning
//! cache and the security flags.
//!
//! Every mutation fires its `before_*` hooks, writes to the backend, then
//! fires its `after_*` hooks. A failing hook marks the transaction as
//! needing rollback: further mutations and commit are refused.
//!
//! # Example
//!
//! ```
//! use ripple_hooks::backend::MemoryStore;
//! use ripple_hooks::entity::Attributes;
//! use ripple_hooks::manager::HooksManager;
//! use ripple_hooks::transaction::Transaction;
//!
//! let store = MemoryStore::new();
//! let mut tx = Transaction::new(HooksManager::default(), store.begin());
//! let ada = tx.create_entity("Person", Attributes::new()).unwrap();
//! tx.commit().unwrap();
//! assert!(store.entity(ada).is_some());
//! ```

use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::backend::{Backend, BackendError};
use crate::data::TransactionData;
use crate::entity::{Attributes, Eid, Entity, Role};
use crate::events::Event;
use crate::hook::HookArgs;
use crate::manager::{DispatchError, HooksManager};
use crate::operation::{Operation, OperationError, OperationId, Processed};
use crate::pending::{OperationEntry, PendingOperations};
use crate::registry::HookRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// State & Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting mutations.
    Active,
    /// A hook failed; only rollback is allowed.
    MustRollback,
    /// Running precommit operations.
    Precommit,
    /// Backend committed, running postcommit operations.
    Postcommit,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// Error returned by transaction calls.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A hook failed earlier; the transaction can only be rolled back.
    #[error("transaction must be rolled back")]
    MustRollback,
    /// The call is not allowed in the transaction's current state.
    #[error("transaction is {0:?}")]
    InvalidState(TransactionState),
    /// Dispatching hooks failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// An operation vetoed the commit; the transaction was rolled back.
    #[error("precommit of operation '{operation}' failed")]
    Precommit {
        /// Name of the failing operation.
        operation: String,
        /// The operation's error.
        #[source]
        source: OperationError,
    },
    /// Storage failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A postcommit failure, reported but not fatal.
#[derive(Debug)]
pub struct PostcommitFailure {
    /// Name of the failing operation.
    pub operation: String,
    /// The operation's error.
    pub error: OperationError,
}

/// Outcome of a successful commit.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Number of operations that ran.
    pub operations: usize,
    /// Postcommit callbacks that failed after the data was committed.
    pub postcommit_failures: Vec<PostcommitFailure>,
}

impl CommitReport {
    /// Returns true if every postcommit callback succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.postcommit_failures.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook Categories
// ─────────────────────────────────────────────────────────────────────────────

/// Which hook categories run in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HooksMode {
    /// Every category runs except the disabled ones.
    AllowAll {
        /// Categories that do not run.
        disabled: HashSet<String>,
    },
    /// No category runs except the enabled ones.
    DenyAll {
        /// Categories that run.
        enabled: HashSet<String>,
    },
}

impl Default for HooksMode {
    fn default() -> Self {
        HooksMode::allow_all()
    }
}

impl HooksMode {
    /// Every category runs.
    #[must_use]
    pub fn allow_all() -> Self {
        HooksMode::AllowAll {
            disabled: HashSet::new(),
        }
    }

    /// No category runs.
    #[must_use]
    pub fn deny_all() -> Self {
        HooksMode::DenyAll {
            enabled: HashSet::new(),
        }
    }

    /// Adds exceptions: disabled categories in allow-all mode, enabled ones
    /// in deny-all mode.
    #[must_use]
    pub fn except<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = match &mut self {
            HooksMode::AllowAll { disabled } => disabled,
            HooksMode::DenyAll { enabled } => enabled,
        };
        set.extend(categories.into_iter().map(Into::into));
        self
    }

    /// Returns true if hooks of `category` run.
    #[must_use]
    pub fn is_active(&self, category: &str) -> bool {
        match self {
            HooksMode::AllowAll { disabled } => !disabled.contains(category),
            HooksMode::DenyAll { enabled } => enabled.contains(category),
        }
    }

    fn set_active(&mut self, category: &str, active: bool) -> bool {
        match self {
            HooksMode::AllowAll { disabled } if active => disabled.remove(category),
            HooksMode::AllowAll { disabled } => disabled.insert(category.to_string()),
            HooksMode::DenyAll { enabled } if active => enabled.insert(category.to_string()),
            HooksMode::DenyAll { enabled } => enabled.remove(category),
        }
    }
}

type PruneKey = (Event, Option<String>, Option<String>);

#[derive(Default)]
struct PruneCache {
    generation: u64,
    entries: HashMap<PruneKey, Arc<HashSet<u64>>>,
}

impl PruneCache {
    fn clear(&mut self) {
        self.entries.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of work against a [`Backend`], with hooks and operations.
pub struct Transaction {
    hooks: HooksManager,
    backend: Box<dyn Backend>,
    pending: PendingOperations,
    data: TransactionData,
    state: TransactionState,
    hooks_mode: HooksMode,
    prune_cache: PruneCache,
    pruning: bool,
    read_security: bool,
    write_security: bool,
    running_hooks: usize,
    added: HashSet<Eid>,
    deleted: HashSet<Eid>,
}

impl Transaction {
    /// Opens a transaction dispatching to `hooks` and writing to `backend`.
    ///
    /// Categories disabled in the manager's configuration start disabled.
    pub fn new(hooks: HooksManager, backend: impl Backend + 'static) -> Self {
        let config = hooks.config();
        let hooks_mode = HooksMode::allow_all().except(config.disabled_categories.iter().cloned());
        let pruning = config.pruning;
        tracing::debug!(pruning, "transaction opened");
        Self {
            hooks,
            backend: Box::new(backend),
            pending: PendingOperations::new(),
            data: TransactionData::new(),
            state: TransactionState::Active,
            hooks_mode,
            prune_cache: PruneCache::default(),
            pruning,
            read_security: true,
            write_security: true,
            running_hooks: 0,
            added: HashSet::new(),
            deleted: HashSet::new(),
        }
    }

    /// Returns the hooks manager.
    #[must_use]
    pub fn hooks(&self) -> &HooksManager {
        &self.hooks
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true if the transaction must be rolled back.
    #[must_use]
    pub fn must_rollback(&self) -> bool {
        self.state == TransactionState::MustRollback
    }

    pub(crate) fn mark_must_rollback(&mut self) {
        if matches!(
            self.state,
            TransactionState::Active | TransactionState::Precommit
        ) {
            tracing::warn!("hook failed, transaction must be rolled back");
            self.state = TransactionState::MustRollback;
        }
    }

    fn ensure_writable(&self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Active | TransactionState::Precommit => Ok(()),
            TransactionState::MustRollback => Err(TransactionError::MustRollback),
            state => Err(TransactionError::InvalidState(state)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Fires `event` inside this transaction.
    ///
    /// # Errors
    ///
    /// Fails if the arguments do not match the event or a hook fails; a
    /// failing hook also marks the transaction for rollback.
    pub fn call_hooks(&mut self, event: Event, args: HookArgs<'_>) -> Result<(), TransactionError> {
        let hooks = self.hooks.clone();
        hooks.call_hooks(event, Some(self), args)?;
        Ok(())
    }

    /// Returns true if pruning is enabled for this transaction.
    #[must_use]
    pub fn pruning_enabled(&self) -> bool {
        self.pruning
    }

    /// Turns pruning on or off for this transaction.
    pub fn set_pruning(&mut self, enabled: bool) {
        self.pruning = enabled;
        self.prune_cache.clear();
    }

    pub(crate) fn pruned_hooks(
        &mut self,
        registry: &HookRegistry,
        etype: Option<&str>,
        rtype: Option<&str>,
        generation: u64,
    ) -> Arc<HashSet<u64>> {
        if self.prune_cache.generation != generation {
            self.prune_cache.clear();
            self.prune_cache.generation = generation;
        }
        let key = (
            registry.event(),
            etype.map(str::to_owned),
            rtype.map(str::to_owned),
        );
        if let Some(pruned) = self.prune_cache.entries.get(&key) {
            return Arc::clone(pruned);
        }
        let mode = &self.hooks_mode;
        let pruned = Arc::new(registry.prunable(&|category: &str| mode.is_active(category), etype, rtype));
        self.prune_cache.entries.insert(key, Arc::clone(&pruned));
        pruned
    }

    #[cfg(test)]
    pub(crate) fn prune_cache_len(&self) -> usize {
        self.prune_cache.entries.len()
    }

    /// Enters hook execution: security off and hook depth incremented,
    /// restored when the scope drops.
    pub(crate) fn hook_scope(&mut self) -> HookScope<'_> {
        let saved = (
            core::mem::replace(&mut self.read_security, false),
            core::mem::replace(&mut self.write_security, false),
        );
        self.running_hooks += 1;
        HookScope { tx: self, saved }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Categories
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the current category mode.
    #[must_use]
    pub fn hooks_mode(&self) -> &HooksMode {
        &self.hooks_mode
    }

    /// Returns true if hooks of `category` run in this transaction.
    #[must_use]
    pub fn is_category_active(&self, category: &str) -> bool {
        self.hooks_mode.is_active(category)
    }

    /// Disables categories, returning those whose state changed.
    pub fn disable_categories<I, S>(&mut self, categories: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.toggle_categories(categories, false)
    }

    /// Enables categories, returning those whose state changed.
    pub fn enable_categories<I, S>(&mut self, categories: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.toggle_categories(categories, true)
    }

    fn toggle_categories<I, S>(&mut self, categories: I, active: bool) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changed: Vec<String> = categories
            .into_iter()
            .filter(|category| self.hooks_mode.set_active(category.as_ref(), active))
            .map(|category| category.as_ref().to_string())
            .collect();
        if !changed.is_empty() {
            self.prune_cache.clear();
            tracing::debug!(?changed, active, "hook categories toggled");
        }
        changed
    }

    /// Switches to `mode` until the returned scope drops.
    pub fn with_hooks_mode(&mut self, mode: HooksMode) -> HooksModeScope<'_> {
        let previous = core::mem::replace(&mut self.hooks_mode, mode);
        self.prune_cache.clear();
        HooksModeScope {
            tx: self,
            previous: Some(previous),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Security
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns true if read permissions are checked.
    #[must_use]
    pub fn read_security(&self) -> bool {
        self.read_security
    }

    /// Returns true if write permissions are checked.
    #[must_use]
    pub fn write_security(&self) -> bool {
        self.write_security
    }

    /// Overrides the security flags until the returned scope drops. `None`
    /// leaves a flag unchanged.
    pub fn security_enabled(&mut self, read: Option<bool>, write: Option<bool>) -> SecurityScope<'_> {
        let saved = (self.read_security, self.write_security);
        if let Some(read) = read {
            self.read_security = read;
        }
        if let Some(write) = write {
            self.write_security = write;
        }
        SecurityScope { tx: self, saved }
    }

    /// Returns how many hook dispatches are currently running.
    #[must_use]
    pub fn running_hooks(&self) -> usize {
        self.running_hooks
    }

    /// Returns true while a hook runs.
    #[must_use]
    pub fn is_running_hooks(&self) -> bool {
        self.running_hooks > 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns an entity as currently stored in this transaction.
    #[must_use]
    pub fn entity(&self, eid: Eid) -> Option<Entity> {
        self.backend.entity(eid)
    }

    /// Returns an entity's type.
    #[must_use]
    pub fn entity_type(&self, eid: Eid) -> Option<String> {
        self.backend.entity_type(eid)
    }

    /// Returns true if the relation exists.
    #[must_use]
    pub fn has_relation(&self, eidfrom: Eid, rtype: &str, eidto: Eid) -> bool {
        self.backend.has_relation(eidfrom, rtype, eidto)
    }

    /// Returns the entities related to `eid` through `rtype`.
    #[must_use]
    pub fn related(&self, eid: Eid, rtype: &str, role: Role) -> Vec<Eid> {
        self.backend.related(eid, rtype, role)
    }

    /// Returns true if the entity was created in this transaction.
    #[must_use]
    pub fn added_in_transaction(&self, eid: Eid) -> bool {
        self.added.contains(&eid)
    }

    /// Returns true if the entity was deleted in this transaction.
    #[must_use]
    pub fn deleted_in_transaction(&self, eid: Eid) -> bool {
        self.deleted.contains(&eid)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates an entity. `before_add_entity` hooks may edit `attrs`.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, a hook fails or storage
    /// fails.
    pub fn create_entity(&mut self, etype: &str, attrs: Attributes) -> Result<Eid, TransactionError> {
        self.ensure_writable()?;
        let eid = self.backend.allocate_eid();
        let mut entity = Entity::new(eid, etype).with_attrs(attrs);
        self.added.insert(eid);
        self.call_hooks(Event::BeforeAddEntity, HookArgs::Entity(&mut entity))?;
        self.backend.insert_entity(&entity)?;
        self.call_hooks(Event::AfterAddEntity, HookArgs::Entity(&mut entity))?;
        tracing::debug!(eid = %eid, etype, "entity created");
        Ok(eid)
    }

    /// Creates several entities of one type, firing each event once for the
    /// whole batch.
    ///
    /// # Errors
    ///
    /// Fails like [`create_entity`](Self::create_entity).
    pub fn create_entities(
        &mut self,
        etype: &str,
        batch: Vec<Attributes>,
    ) -> Result<Vec<Eid>, TransactionError> {
        self.ensure_writable()?;
        let mut entities: Vec<Entity> = batch
            .into_iter()
            .map(|attrs| Entity::new(self.backend.allocate_eid(), etype).with_attrs(attrs))
            .collect();
        self.added.extend(entities.iter().map(Entity::eid));
        self.call_hooks(Event::BeforeAddEntity, HookArgs::Entities(&mut entities))?;
        for entity in &entities {
            self.backend.insert_entity(entity)?;
        }
        self.call_hooks(Event::AfterAddEntity, HookArgs::Entities(&mut entities))?;
        tracing::debug!(etype, count = entities.len(), "entities created");
        Ok(entities.iter().map(Entity::eid).collect())
    }

    /// Writes edited attributes. `before_update_entity` hooks may change
    /// the edits.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown, the transaction is not writable, a
    /// hook fails or storage fails.
    pub fn update_entity(&mut self, eid: Eid, edits: Attributes) -> Result<(), TransactionError> {
        self.ensure_writable()?;
        let etype = self
            .backend
            .entity_type(eid)
            .ok_or(BackendError::UnknownEntity(eid))?;
        let mut entity = Entity::new(eid, etype).with_attrs(edits);
        self.call_hooks(Event::BeforeUpdateEntity, HookArgs::Entity(&mut entity))?;
        self.backend.update_entity(eid, entity.attrs())?;
        self.call_hooks(Event::AfterUpdateEntity, HookArgs::Entity(&mut entity))?;
        Ok(())
    }

    /// Deletes an entity, first deleting every relation it takes part in.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown, the transaction is not writable, a
    /// hook fails or storage fails.
    pub fn delete_entity(&mut self, eid: Eid) -> Result<(), TransactionError> {
        self.ensure_writable()?;
        let mut entity = self
            .backend
            .entity(eid)
            .ok_or(BackendError::UnknownEntity(eid))?;
        self.call_hooks(Event::BeforeDeleteEntity, HookArgs::Entity(&mut entity))?;
        for (eidfrom, rtype, eidto) in self.backend.relations_of(eid) {
            self.delete_relation(eidfrom, &rtype, eidto)?;
        }
        self.backend.delete_entity(eid)?;
        self.deleted.insert(eid);
        self.call_hooks(Event::AfterDeleteEntity, HookArgs::Entity(&mut entity))?;
        tracing::debug!(eid = %eid, "entity deleted");
        Ok(())
    }

    /// Adds a relation. Returns false, firing nothing, if it already exists.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, a hook fails or storage
    /// fails.
    pub fn add_relation(&mut self, eidfrom: Eid, rtype: &str, eidto: Eid) -> Result<bool, TransactionError> {
        self.ensure_writable()?;
        if self.backend.has_relation(eidfrom, rtype, eidto) {
            return Ok(false);
        }
        let args = || HookArgs::Relation {
            eidfrom,
            rtype,
            eidto,
        };
        self.call_hooks(Event::BeforeAddRelation, args())?;
        self.backend.add_relation(eidfrom, rtype, eidto)?;
        self.call_hooks(Event::AfterAddRelation, args())?;
        Ok(true)
    }

    /// Adds several relations of one type, firing each event once for the
    /// batch. Pairs that already exist are skipped; returns the added ones.
    ///
    /// # Errors
    ///
    /// Fails like [`add_relation`](Self::add_relation).
    pub fn add_relations(
        &mut self,
        rtype: &str,
        pairs: &[(Eid, Eid)],
    ) -> Result<Vec<(Eid, Eid)>, TransactionError> {
        self.ensure_writable()?;
        let mut new_pairs: Vec<(Eid, Eid)> = Vec::with_capacity(pairs.len());
        for &(eidfrom, eidto) in pairs {
            if !self.backend.has_relation(eidfrom, rtype, eidto)
                && !new_pairs.contains(&(eidfrom, eidto))
            {
                new_pairs.push((eidfrom, eidto));
            }
        }
        if new_pairs.is_empty() {
            return Ok(new_pairs);
        }
        self.call_hooks(
            Event::BeforeAddRelation,
            HookArgs::Relations {
                rtype,
                pairs: &new_pairs,
            },
        )?;
        for &(eidfrom, eidto) in &new_pairs {
            self.backend.add_relation(eidfrom, rtype, eidto)?;
        }
        self.call_hooks(
            Event::AfterAddRelation,
            HookArgs::Relations {
                rtype,
                pairs: &new_pairs,
            },
        )?;
        Ok(new_pairs)
    }

    /// Deletes a relation. Returns false, firing nothing, if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, a hook fails or storage
    /// fails.
    pub fn delete_relation(&mut self, eidfrom: Eid, rtype: &str, eidto: Eid) -> Result<bool, TransactionError> {
        self.ensure_writable()?;
        if !self.backend.has_relation(eidfrom, rtype, eidto) {
            return Ok(false);
        }
        let args = || HookArgs::Relation {
            eidfrom,
            rtype,
            eidto,
        };
        self.call_hooks(Event::BeforeDeleteRelation, args())?;
        self.backend.delete_relation(eidfrom, rtype, eidto)?;
        self.call_hooks(Event::AfterDeleteRelation, args())?;
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations & Data
    // ─────────────────────────────────────────────────────────────────────────

    /// Queues an operation.
    pub fn add_operation<T: Operation>(&mut self, op: T) -> OperationId {
        self.add_boxed_operation(Box::new(op)).0
    }

    /// Queues a boxed operation, returning the single-last instance it
    /// replaced, if any.
    pub fn add_boxed_operation(
        &mut self,
        op: Box<dyn Operation>,
    ) -> (OperationId, Option<Box<dyn Operation>>) {
        let name = op.name().to_string();
        let (id, previous) = self.pending.push(op);
        tracing::debug!(operation = %name, id = %id, replaced = previous.is_some(), "operation queued");
        (id, previous)
    }

    /// Queues a single-last operation, returning the instance of the same
    /// type it replaced. The new instance goes to the end of the queue.
    pub fn add_single_last<T: Operation>(&mut self, op: T) -> Option<T> {
        let (_, previous) = self.add_boxed_operation(Box::new(op));
        previous
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    /// Queues a single-last operation, letting `merge` fold the replaced
    /// instance into the new one.
    pub fn add_single_last_merged<T: Operation>(
        &mut self,
        op: T,
        merge: impl FnOnce(&mut T, T),
    ) -> OperationId {
        let (id, previous) = self.add_boxed_operation(Box::new(op));
        let previous = previous.and_then(|previous| previous.downcast::<T>().ok());
        if let (Some(previous), Some(current)) = (previous, self.operation_mut::<T>(id)) {
            merge(current, *previous);
        }
        id
    }

    /// Returns the queued operation with this id if it has type `T`.
    #[must_use]
    pub fn operation<T: Operation>(&self, id: OperationId) -> Option<&T> {
        self.pending
            .get(id)
            .and_then(|entry| entry.op.downcast_ref::<T>())
    }

    /// Returns the queued operation with this id mutably if it has type `T`.
    pub fn operation_mut<T: Operation>(&mut self, id: OperationId) -> Option<&mut T> {
        self.pending
            .get_mut(id)
            .and_then(|entry| entry.op.downcast_mut::<T>())
    }

    /// Returns the pending operations.
    #[must_use]
    pub fn pending_operations(&self) -> &PendingOperations {
        &self.pending
    }

    /// Returns the scratch data.
    #[must_use]
    pub fn transaction_data(&self) -> &TransactionData {
        &self.data
    }

    /// Returns the scratch data mutably.
    pub fn transaction_data_mut(&mut self) -> &mut TransactionData {
        &mut self.data
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit & Rollback
    // ─────────────────────────────────────────────────────────────────────────

    /// Commits the transaction.
    ///
    /// Runs every operation's precommit in queue order, including
    /// operations queued meanwhile, then commits the backend, then runs
    /// postcommits. Postcommit failures are reported in the returned
    /// [`CommitReport`].
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::MustRollback`] if a hook failed earlier.
    /// Returns [`TransactionError::Precommit`] if an operation vetoed the
    /// commit; processed operations were reverted and the transaction
    /// rolled back.
    pub fn commit(&mut self) -> Result<CommitReport, TransactionError> {
        match self.state {
            TransactionState::Active => {}
            TransactionState::MustRollback => return Err(TransactionError::MustRollback),
            state => return Err(TransactionError::InvalidState(state)),
        }
        self.state = TransactionState::Precommit;

        let mut processed: Vec<OperationEntry> = Vec::new();
        while let Some(mut entry) = self.pending.pop_front() {
            tracing::debug!(operation = entry.name(), "precommit");
            let result = match entry.op.precommit_event(self) {
                Ok(()) if self.must_rollback() => Err(OperationError::from(TransactionError::MustRollback)),
                result => result,
            };
            if let Err(source) = result {
                entry.failed = true;
                let operation = entry.name().to_string();
                tracing::error!(operation = %operation, error = %source, "precommit failed, rolling back");
                self.abort_commit(processed, Some(entry));
                return Err(TransactionError::Precommit { operation, source });
            }
            entry.processed = Some(Processed::Precommit);
            processed.push(entry);
        }

        if let Err(err) = self.backend.commit() {
            tracing::error!(error = %err, "backend commit failed, rolling back");
            self.abort_commit(processed, None);
            return Err(err.into());
        }

        self.state = TransactionState::Postcommit;
        let mut report = CommitReport {
            operations: processed.len(),
            ..CommitReport::default()
        };
        for entry in &mut processed {
            tracing::debug!(operation = entry.name(), "postcommit");
            match entry.op.postcommit_event(self) {
                Ok(()) => entry.processed = Some(Processed::Postcommit),
                Err(error) => {
                    tracing::error!(operation = entry.name(), error = %error, "postcommit failed");
                    report.postcommit_failures.push(PostcommitFailure {
                        operation: entry.name().to_string(),
                        error,
                    });
                }
            }
        }
        let late = self.pending.len();
        if late > 0 {
            tracing::warn!(count = late, "discarding operations queued during postcommit");
            self.pending.clear();
        }

        self.finish(TransactionState::Committed);
        tracing::info!(
            operations = report.operations,
            postcommit_failures = report.postcommit_failures.len(),
            "transaction committed"
        );
        Ok(report)
    }

    fn abort_commit(&mut self, mut processed: Vec<OperationEntry>, failed: Option<OperationEntry>) {
        for entry in processed.iter_mut().rev() {
            tracing::debug!(operation = entry.name(), "revertprecommit");
            if let Err(err) = entry.op.revertprecommit_event(self) {
                tracing::error!(operation = entry.name(), error = %err, "revertprecommit failed");
            }
        }
        let remaining = self.pending.drain_all();
        let queue = processed.into_iter().chain(failed).chain(remaining);
        self.rollback_operations(queue);
        if let Err(err) = self.backend.rollback() {
            tracing::error!(error = %err, "backend rollback failed");
        }
        self.finish(TransactionState::RolledBack);
        tracing::info!("transaction rolled back after failed commit");
    }

    fn rollback_operations(&mut self, queue: impl Iterator<Item = OperationEntry>) {
        for mut entry in queue {
            tracing::debug!(operation = entry.name(), "rollback");
            if let Err(err) = entry.op.rollback_event(self) {
                tracing::error!(operation = entry.name(), error = %err, "rollback failed");
            }
        }
        self.pending.clear();
    }

    /// Rolls the transaction back, running every queued operation's
    /// rollback in queue order.
    ///
    /// # Errors
    ///
    /// Fails if the transaction already ended or is committing, or if the
    /// backend rollback fails; in the last case the transaction is closed
    /// anyway. An operation aborts a commit by failing its precommit.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Active | TransactionState::MustRollback => self.rollback_now(),
            state => Err(TransactionError::InvalidState(state)),
        }
    }

    fn rollback_now(&mut self) -> Result<(), TransactionError> {
        let queue = self.pending.drain_all();
        self.rollback_operations(queue.into_iter());
        let result = self.backend.rollback();
        self.finish(TransactionState::RolledBack);
        tracing::info!("transaction rolled back");
        result.map_err(Into::into)
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.data.clear();
        self.prune_cache.clear();
        self.added.clear();
        self.deleted.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::Committed | TransactionState::RolledBack | TransactionState::Postcommit
        ) {
            return;
        }
        tracing::warn!(state = ?self.state, "transaction dropped while open, rolling back");
        if let Err(err) = self.rollback_now() {
            tracing::error!(error = %err, "rollback on drop failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scopes
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! deref_to_transaction {
    ($scope:ident) => {
        impl Deref for $scope<'_> {
            type Target = Transaction;

            fn deref(&self) -> &Transaction {
                &*self.tx
            }
        }

        impl DerefMut for $scope<'_> {
            fn deref_mut(&mut self) -> &mut Transaction {
                &mut *self.tx
            }
        }
    };
}

/// Restores the security flags when dropped.
pub struct SecurityScope<'a> {
    tx: &'a mut Transaction,
    saved: (bool, bool),
}

deref_to_transaction!(SecurityScope);

impl Drop for SecurityScope<'_> {
    fn drop(&mut self) {
        (self.tx.read_security, self.tx.write_security) = self.saved;
    }
}

/// Restores the previous category mode when dropped.
pub struct HooksModeScope<'a> {
    tx: &'a mut Transaction,
    previous: Option<HooksMode>,
}

deref_to_transaction!(HooksModeScope);

impl Drop for HooksModeScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.tx.hooks_mode = previous;
            self.tx.prune_cache.clear();
        }
    }
}

/// Active while hooks run; restores the security flags and the hook depth.
pub(crate) struct HookScope<'a> {
    tx: &'a mut Transaction,
    saved: (bool, bool),
}

deref_to_transaction!(HookScope);

impl Drop for HookScope<'_> {
    fn drop(&mut self) {
        (self.tx.read_security, self.tx.write_security) = self.saved;
        self.tx.running_hooks -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::hook::{FnHook, HookError};
    use crate::plugin::HooksConfig;
    use parking_lot::Mutex;
    use serde_json::json;

    fn open(hooks: &HooksManager) -> (MemoryStore, Transaction) {
        let store = MemoryStore::new();
        let tx = Transaction::new(hooks.clone(), store.begin());
        (store, tx)
    }

    #[test]
    fn before_hooks_edit_attributes() {
        let hooks = HooksManager::default();
        hooks
            .register(FnHook::new("stamp", &["before_add_entity"], |cx| {
                if let Some(entity) = cx.entity_mut() {
                    entity.set("stamped", true);
                }
                Ok(())
            }))
            .unwrap();
        let (store, mut tx) = open(&hooks);
        let eid = tx.create_entity("Person", Attributes::new()).unwrap();
        tx.commit().unwrap();
        assert_eq!(
            store.entity(eid).and_then(|e| e.get("stamped").cloned()),
            Some(json!(true))
        );
    }

    #[test]
    fn failing_hook_forces_rollback() {
        let hooks = HooksManager::default();
        hooks
            .register(FnHook::new("veto", &["before_add_relation"], |_| {
                Err(HookError::failed("no"))
            }))
            .unwrap();
        let (store, mut tx) = open(&hooks);
        let a = tx.create_entity("Person", Attributes::new()).unwrap();
        let b = tx.create_entity("Person", Attributes::new()).unwrap();

        assert!(tx.add_relation(a, "knows", b).is_err());
        assert!(tx.must_rollback());
        assert!(matches!(
            tx.create_entity("Person", Attributes::new()),
            Err(TransactionError::MustRollback)
        ));
        assert!(matches!(tx.commit(), Err(TransactionError::MustRollback)));
        tx.rollback().unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn security_is_off_inside_hooks_and_restored() {
        let hooks = HooksManager::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let journal = Arc::clone(&seen);
        hooks
            .register(FnHook::new("probe", &["after_add_entity"], move |cx| {
                let tx = cx.tx()?;
                journal
                    .lock()
                    .push((tx.read_security(), tx.write_security(), tx.running_hooks()));
                Ok(())
            }))
            .unwrap();
        let (_store, mut tx) = open(&hooks);
        tx.create_entity("Person", Attributes::new()).unwrap();

        assert_eq!(*seen.lock(), vec![(false, false, 1)]);
        assert!(tx.read_security());
        assert!(tx.write_security());
        assert_eq!(tx.running_hooks(), 0);
    }

    #[test]
    fn security_scope_restores_flags() {
        let hooks = HooksManager::default();
        let (_store, mut tx) = open(&hooks);
        {
            let scope = tx.security_enabled(Some(false), Some(false));
            assert!(!scope.read_security());
            assert!(!scope.write_security());
        }
        assert!(tx.read_security());
        assert!(tx.write_security());
    }

    #[test]
    fn hooks_mode_scope_restores_mode() {
        let hooks = HooksManager::default();
        let (_store, mut tx) = open(&hooks);
        {
            let scope = tx.with_hooks_mode(HooksMode::deny_all().except(["integrity"]));
            assert!(scope.is_category_active("integrity"));
            assert!(!scope.is_category_active("email"));
        }
        assert!(tx.is_category_active("email"));
    }

    #[test]
    fn toggling_categories_reports_changes_and_clears_cache() {
        let hooks = HooksManager::default();
        hooks
            .register(FnHook::new("audit", &["after_add_entity"], |_| Ok(())).with_category("audit"))
            .unwrap();
        let (_store, mut tx) = open(&hooks);
        tx.create_entity("Person", Attributes::new()).unwrap();
        assert_eq!(tx.prune_cache_len(), 1);

        assert_eq!(tx.disable_categories(["audit", "audit"]), vec!["audit"]);
        assert_eq!(tx.prune_cache_len(), 0);
        assert!(tx.disable_categories(["audit"]).is_empty());
        assert_eq!(tx.enable_categories(["audit"]), vec!["audit"]);
    }

    #[test]
    fn configured_categories_start_disabled() {
        let hooks = HooksManager::with_config(HooksConfig {
            pruning: false,
            disabled_categories: vec!["email".into()],
        });
        let (_store, tx) = open(&hooks);
        assert!(!tx.is_category_active("email"));
        assert!(!tx.pruning_enabled());
    }

    #[test]
    fn delete_entity_deletes_relations_through_hooks() {
        let hooks = HooksManager::default();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let journal = Arc::clone(&deleted);
        hooks
            .register(FnHook::new("track", &["after_delete_relation"], move |cx| {
                if let Some(rel) = cx.relation() {
                    journal.lock().push(rel.rtype.to_string());
                }
                Ok(())
            }))
            .unwrap();
        let (_store, mut tx) = open(&hooks);
        let a = tx.create_entity("Person", Attributes::new()).unwrap();
        let b = tx.create_entity("Person", Attributes::new()).unwrap();
        tx.add_relation(a, "knows", b).unwrap();
        tx.add_relation(b, "likes", a).unwrap();

        tx.delete_entity(a).unwrap();
        let mut rtypes = deleted.lock().clone();
        rtypes.sort();
        assert_eq!(rtypes, vec!["knows", "likes"]);
        assert!(tx.deleted_in_transaction(a));
        assert!(tx.added_in_transaction(a));
    }

    #[test]
    fn existing_relations_are_not_added_twice() {
        let hooks = HooksManager::default();
        let (_store, mut tx) = open(&hooks);
        let a = tx.create_entity("Person", Attributes::new()).unwrap();
        let b = tx.create_entity("Person", Attributes::new()).unwrap();
        assert!(tx.add_relation(a, "knows", b).unwrap());
        assert!(!tx.add_relation(a, "knows", b).unwrap());
        let added = tx.add_relations("knows", &[(a, b), (b, a), (b, a)]).unwrap();
        assert_eq!(added, vec![(b, a)]);
        assert!(!tx.delete_relation(a, "likes", b).unwrap());
    }

    #[test]
    fn interleaved_transactions_both_persist() {
        let hooks = HooksManager::default();
        let store = MemoryStore::new();
        let mut t1 = Transaction::new(hooks.clone(), store.begin());
        let mut t2 = Transaction::new(hooks.clone(), store.begin());
        let a = t1.create_entity("Person", Attributes::new()).unwrap();
        let b = t2.create_entity("Person", Attributes::new()).unwrap();
        t1.commit().unwrap();
        t2.commit().unwrap();

        assert!(store.entity(a).is_some());
        assert!(store.entity(b).is_some());
    }

    #[test]
    fn closed_transactions_refuse_work() {
        let hooks = HooksManager::default();
        let (_store, mut tx) = open(&hooks);
        tx.commit().unwrap();
        assert!(matches!(
            tx.create_entity("Person", Attributes::new()),
            Err(TransactionError::InvalidState(TransactionState::Committed))
        ));
        assert!(matches!(tx.commit(), Err(TransactionError::InvalidState(_))));
        assert!(tx.rollback().is_err());
    }
}
