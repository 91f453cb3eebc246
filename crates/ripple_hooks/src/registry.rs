//! Per-event hook registries and selection.

use std::sync::Arc;

use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::events::{Event, UnknownEvent};
use crate::hook::Hook;
use crate::selector::{Score, SelectContext};

/// Error returned when a hook cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookRegistrationError {
    /// The hook declares no events.
    #[error("hook '{hook}' declares no events")]
    NoEvents {
        /// Offending hook id.
        hook: String,
    },
    /// The hook declares an event outside the taxonomy.
    #[error("hook '{hook}' declares an unknown event: {source}")]
    UnknownEvent {
        /// Offending hook id.
        hook: String,
        /// The rejected name.
        source: UnknownEvent,
    },
    /// This very hook object is already registered for the event.
    #[error("hook '{hook}' is already registered for {event}")]
    AlreadyRegistered {
        /// Offending hook id.
        hook: String,
        /// Event it is already registered for.
        event: Event,
    },
}

/// Parses and validates the event names a hook declares.
pub(crate) fn parse_events(hook: &dyn Hook) -> Result<Vec<Event>, HookRegistrationError> {
    let names = hook.events();
    if names.is_empty() {
        return Err(HookRegistrationError::NoEvents {
            hook: hook.id().to_string(),
        });
    }
    let mut events = Vec::with_capacity(names.len());
    for name in names {
        let event = name
            .parse::<Event>()
            .map_err(|source| HookRegistrationError::UnknownEvent {
                hook: hook.id().to_string(),
                source,
            })?;
        if !events.contains(&event) {
            events.push(event);
        }
    }
    Ok(events)
}

/// A registered hook with its registration sequence number.
#[derive(Clone)]
pub(crate) struct HookEntry {
    pub(crate) seq: u64,
    pub(crate) hook: Arc<dyn Hook>,
}

/// The hooks registered for one event, in registration order.
pub struct HookRegistry {
    event: Event,
    entries: Vec<HookEntry>,
}

impl HookRegistry {
    /// Creates an empty registry for `event`.
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self {
            event,
            entries: Vec::new(),
        }
    }

    /// Returns the event this registry serves.
    #[must_use]
    pub fn event(&self) -> Event {
        self.event
    }

    /// Returns the number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if an implementation with this id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.hook.id() == id)
    }

    pub(crate) fn check_insert(&self, hook: &Arc<dyn Hook>) -> Result<(), HookRegistrationError> {
        if self.entries.iter().any(|entry| Arc::ptr_eq(&entry.hook, hook)) {
            return Err(HookRegistrationError::AlreadyRegistered {
                hook: hook.id().to_string(),
                event: self.event,
            });
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, entry: HookEntry) {
        self.entries.push(entry);
    }

    /// Removes every implementation registered under `id`.
    pub(crate) fn remove_id(&mut self, id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.hook.id() != id);
        before - self.entries.len()
    }

    pub(crate) fn remove_seq(&mut self, seq: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.seq != seq);
        before != self.entries.len()
    }

    /// Computes the hooks that can be skipped for calls keyed by
    /// `(etype, rtype)`: inactive categories, and selectors whose prune hint
    /// excludes the key.
    pub(crate) fn prunable(
        &self,
        is_active: &dyn Fn(&str) -> bool,
        etype: Option<&str>,
        rtype: Option<&str>,
    ) -> HashSet<u64> {
        self.entries
            .iter()
            .filter(|entry| {
                !is_active(entry.hook.category())
                    || entry
                        .hook
                        .selector()
                        .prune_hint()
                        .is_some_and(|hint| hint.excludes(etype, rtype))
            })
            .map(|entry| entry.seq)
            .collect()
    }

    /// Selects the hooks to run for one concrete call.
    ///
    /// Per id, the applicable implementation with the highest score wins;
    /// ties go to the earliest registration. Winners are returned sorted by
    /// `(order, registration)`.
    pub(crate) fn select(
        &self,
        cx: &SelectContext<'_>,
        pruned: Option<&HashSet<u64>>,
        is_active: Option<&dyn Fn(&str) -> bool>,
    ) -> Vec<HookEntry> {
        let mut winners: IndexMap<&str, (Score, &HookEntry)> = IndexMap::new();
        for entry in &self.entries {
            if pruned.is_some_and(|pruned| pruned.contains(&entry.seq)) {
                continue;
            }
            if is_active.is_some_and(|is_active| !is_active(entry.hook.category())) {
                continue;
            }
            let Some(score) = entry.hook.selector().score(cx) else {
                continue;
            };
            let id = entry.hook.id();
            match winners.get_mut(id) {
                Some(current) if current.0 < score => *current = (score, entry),
                Some(_) => {}
                None => {
                    winners.insert(id, (score, entry));
                }
            }
        }
        let mut selected: Vec<HookEntry> = winners.into_values().map(|(_, e)| e.clone()).collect();
        selected.sort_by_key(|entry| (entry.hook.order(), entry.seq));
        selected
    }
}
