//! The hooks manager: registration and dispatch.
//!
//! [`HooksManager`] is the server-wide registry of hooks, installed as an
//! [`API`] by [`HooksPlugin`](crate::plugin::HooksPlugin). Registries are
//! keyed by [`Event`] and guarded by a `RwLock`; dispatch clones the
//! selected hooks out of the lock before running them, so hooks can mutate
//! data and fire nested events.
//!
//! # Example
//!
//! ```
//! use ripple_hooks::hook::FnHook;
//! use ripple_hooks::manager::HooksManager;
//!
//! let hooks = HooksManager::default();
//! hooks
//!     .register(FnHook::new("greet", &["server_startup"], |_cx| Ok(())))
//!     .unwrap();
//! hooks.call_system_hooks("server_startup".parse().unwrap()).unwrap();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use ripple_system::api::API;

use crate::entity::{Eid, RelationRef};
use crate::events::{Event, EventFamily};
use crate::hook::{Hook, HookArgs, HookContext, HookError, HookTarget};
use crate::plugin::HooksConfig;
use crate::registry::{HookEntry, HookRegistrationError, HookRegistry, parse_events};
use crate::selector::SelectContext;
use crate::transaction::Transaction;

/// Error returned by a dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The arguments do not match the event's family.
    #[error("{event} cannot be fired with {args} arguments")]
    ArgumentMismatch {
        /// The event fired.
        event: Event,
        /// Shape of the arguments given.
        args: &'static str,
    },
    /// A hook body failed.
    #[error("hook '{hook}' failed on {event}")]
    Hook {
        /// Id of the failing hook.
        hook: String,
        /// The event being dispatched.
        event: Event,
        /// The hook's error.
        #[source]
        source: HookError,
    },
}

struct ManagerInner {
    registries: RwLock<HashMap<Event, HookRegistry>>,
    next_seq: AtomicU64,
    generation: AtomicU64,
    config: HooksConfig,
}

/// Server-wide hook registry and dispatcher.
///
/// Cloning is cheap; clones share the registries.
#[derive(Clone)]
pub struct HooksManager {
    inner: Arc<ManagerInner>,
}

impl API for HooksManager {}

impl Default for HooksManager {
    fn default() -> Self {
        Self::with_config(HooksConfig::default())
    }
}

impl HooksManager {
    /// Creates an empty manager with `config`.
    #[must_use]
    pub fn with_config(config: HooksConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registries: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Returns the configuration new transactions start from.
    #[must_use]
    pub fn config(&self) -> &HooksConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers a hook for every event it declares.
    ///
    /// # Errors
    ///
    /// Fails if the hook declares no events or an unknown one.
    pub fn register<H: Hook>(&self, hook: H) -> Result<(), HookRegistrationError> {
        self.insert(Arc::new(hook)).map(|_| ())
    }

    /// Registers a shared hook.
    ///
    /// # Errors
    ///
    /// Fails if the hook declares no events or an unknown one, or if this
    /// very object is already registered.
    pub fn register_arc(&self, hook: Arc<dyn Hook>) -> Result<(), HookRegistrationError> {
        self.insert(hook).map(|_| ())
    }

    /// Registers a hook that is unregistered when the returned guard drops.
    ///
    /// # Errors
    ///
    /// Fails like [`register`](Self::register).
    pub fn install<H: Hook>(&self, hook: H) -> Result<TemporaryHook, HookRegistrationError> {
        let hook: Arc<dyn Hook> = Arc::new(hook);
        let id = hook.id().to_string();
        let seq = self.insert(hook)?;
        Ok(TemporaryHook {
            manager: self.clone(),
            seq,
            id,
        })
    }

    fn insert(&self, hook: Arc<dyn Hook>) -> Result<u64, HookRegistrationError> {
        let events = parse_events(&*hook)?;
        let mut registries = self.inner.registries.write();
        for event in &events {
            if let Some(registry) = registries.get(event) {
                registry.check_insert(&hook)?;
            }
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        for event in &events {
            registries
                .entry(*event)
                .or_insert_with(|| HookRegistry::new(*event))
                .push(HookEntry {
                    seq,
                    hook: Arc::clone(&hook),
                });
        }
        self.inner.generation.fetch_add(1, Ordering::Release);
        tracing::debug!(hook = hook.id(), seq, events = events.len(), "hook registered");
        Ok(seq)
    }

    /// Unregisters every implementation registered under `id`, returning
    /// how many registrations were removed.
    pub fn unregister(&self, id: &str) -> usize {
        let removed: usize = self
            .inner
            .registries
            .write()
            .values_mut()
            .map(|registry| registry.remove_id(id))
            .sum();
        if removed > 0 {
            self.inner.generation.fetch_add(1, Ordering::Release);
            tracing::debug!(hook = id, removed, "hook unregistered");
        }
        removed
    }

    fn remove_seq(&self, seq: u64) {
        let mut removed = false;
        for registry in self.inner.registries.write().values_mut() {
            removed |= registry.remove_seq(seq);
        }
        if removed {
            self.inner.generation.fetch_add(1, Ordering::Release);
        }
    }

    /// Returns the number of hooks registered for `event`.
    #[must_use]
    pub fn hook_count(&self, event: Event) -> usize {
        self.inner
            .registries
            .read()
            .get(&event)
            .map_or(0, HookRegistry::len)
    }

    /// Returns true if a hook with this id is registered for `event`.
    #[must_use]
    pub fn contains_hook(&self, event: Event, id: &str) -> bool {
        self.inner
            .registries
            .read()
            .get(&event)
            .is_some_and(|registry| registry.contains(id))
    }

    /// Returns a counter bumped on every registry change.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Fires a system event outside any transaction.
    ///
    /// # Errors
    ///
    /// Fails if `event` is not a system event or a hook fails.
    pub fn call_system_hooks(&self, event: Event) -> Result<(), DispatchError> {
        self.call_hooks(event, None, HookArgs::System)
    }

    /// Fires `event`, optionally inside `tx`.
    ///
    /// Batch arguments are fanned out, each entity or pair being its own
    /// call. Inside a transaction, hooks of inactive categories never run
    /// and security checks are off while hooks run. A failing hook marks
    /// the transaction for rollback.
    ///
    /// # Errors
    ///
    /// Fails if `args` do not match the event's family, or on the first
    /// failing hook.
    pub fn call_hooks(
        &self,
        event: Event,
        mut tx: Option<&mut Transaction>,
        args: HookArgs<'_>,
    ) -> Result<(), DispatchError> {
        check_args(event, &args)?;
        match args {
            HookArgs::System => self.fire(event, tx, HookTarget::System),
            HookArgs::Entity(entity) => self.fire(event, tx, HookTarget::Entity(entity)),
            HookArgs::Entities(entities) => {
                for entity in entities.iter_mut() {
                    self.fire(event, tx.as_deref_mut(), HookTarget::Entity(entity))?;
                }
                Ok(())
            }
            HookArgs::Relation {
                eidfrom,
                rtype,
                eidto,
            } => self.fire(event, tx, relation_target(eidfrom, rtype, eidto)),
            HookArgs::Relations { rtype, pairs } => {
                for &(eidfrom, eidto) in pairs {
                    self.fire(
                        event,
                        tx.as_deref_mut(),
                        relation_target(eidfrom, rtype, eidto),
                    )?;
                }
                Ok(())
            }
        }
    }

    fn fire(
        &self,
        event: Event,
        tx: Option<&mut Transaction>,
        mut target: HookTarget<'_>,
    ) -> Result<(), DispatchError> {
        let Some(tx) = tx else {
            let hooks = self.select(event, &target);
            for entry in &hooks {
                invoke(event, entry, None, target.reborrow())?;
            }
            return Ok(());
        };

        let hooks = self.select_in(event, &target, tx);
        if hooks.is_empty() {
            return Ok(());
        }
        let mut scope = tx.hook_scope();
        for entry in &hooks {
            if let Err(err) = invoke(event, entry, Some(&mut *scope), target.reborrow()) {
                scope.mark_must_rollback();
                return Err(err);
            }
        }
        Ok(())
    }

    fn select(&self, event: Event, target: &HookTarget<'_>) -> Vec<HookEntry> {
        let registries = self.inner.registries.read();
        let Some(registry) = registries.get(&event) else {
            return Vec::new();
        };
        let cx = SelectContext::new(event, target.as_select());
        registry.select(&cx, None, None)
    }

    fn select_in(
        &self,
        event: Event,
        target: &HookTarget<'_>,
        tx: &mut Transaction,
    ) -> Vec<HookEntry> {
        let registries = self.inner.registries.read();
        let Some(registry) = registries.get(&event) else {
            return Vec::new();
        };
        let (etype, rtype) = target.prune_key();
        let pruned: Option<Arc<HashSet<u64>>> = tx
            .pruning_enabled()
            .then(|| tx.pruned_hooks(registry, etype, rtype, self.generation()));

        let tx: &Transaction = tx;
        let is_active = |category: &str| tx.is_category_active(category);
        let cx = SelectContext::new(event, target.as_select()).with_transaction(tx);
        registry.select(&cx, pruned.as_deref(), Some(&is_active))
    }
}

fn relation_target(eidfrom: Eid, rtype: &str, eidto: Eid) -> HookTarget<'_> {
    HookTarget::Relation(RelationRef {
        eidfrom,
        rtype,
        eidto,
    })
}

fn check_args(event: Event, args: &HookArgs<'_>) -> Result<(), DispatchError> {
    let expected = match event.family() {
        EventFamily::Entity => "entity",
        EventFamily::Relation => "relation",
        EventFamily::System => "system",
    };
    if args.shape() == expected {
        Ok(())
    } else {
        Err(DispatchError::ArgumentMismatch {
            event,
            args: args.shape(),
        })
    }
}

fn invoke(
    event: Event,
    entry: &HookEntry,
    tx: Option<&mut Transaction>,
    target: HookTarget<'_>,
) -> Result<(), DispatchError> {
    let hook = &entry.hook;
    tracing::debug!(event = %event, hook = hook.id(), category = hook.category(), "calling hook");
    let mut cx = HookContext::new(event, tx, target);
    hook.call(&mut cx).map_err(|source| {
        tracing::debug!(event = %event, hook = hook.id(), error = %source, "hook failed");
        DispatchError::Hook {
            hook: hook.id().to_string(),
            event,
            source,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// TemporaryHook
// ─────────────────────────────────────────────────────────────────────────────

/// Guard returned by [`HooksManager::install`]; unregisters the hook on drop.
#[must_use = "the hook is unregistered as soon as the guard is dropped"]
pub struct TemporaryHook {
    manager: HooksManager,
    seq: u64,
    id: String,
}

impl TemporaryHook {
    /// Returns the installed hook's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for TemporaryHook {
    fn drop(&mut self) {
        self.manager.remove_seq(self.seq);
        tracing::debug!(hook = %self.id, "temporary hook removed");
    }
}
