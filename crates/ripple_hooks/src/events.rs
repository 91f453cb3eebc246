//! The closed event taxonomy.
//!
//! Every hook answers to one or more [`Event`]s. Hooks declare their events
//! by name; names are parsed with [`Event::from_str`](core::str::FromStr)
//! when the hook is registered, so a typo fails at load time instead of
//! silently never firing.

use core::fmt;
use core::str::FromStr;

/// The family an event belongs to, which determines the arguments it is
/// fired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    /// Fired around entity creation, update and deletion.
    Entity,
    /// Fired around relation creation and deletion.
    Relation,
    /// Server and session lifecycle events.
    System,
}

/// A hookable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    // ─────────────────────────────────────────────────────────────────────────
    // Entity Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Before an entity is inserted; hooks may still edit its attributes.
    BeforeAddEntity,
    /// After an entity has been inserted.
    AfterAddEntity,
    /// Before an entity's edited attributes are written.
    BeforeUpdateEntity,
    /// After an entity's edited attributes have been written.
    AfterUpdateEntity,
    /// Before an entity is deleted.
    BeforeDeleteEntity,
    /// After an entity has been deleted.
    AfterDeleteEntity,

    // ─────────────────────────────────────────────────────────────────────────
    // Relation Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Before a relation is added.
    BeforeAddRelation,
    /// After a relation has been added.
    AfterAddRelation,
    /// Before a relation is deleted.
    BeforeDeleteRelation,
    /// After a relation has been deleted.
    AfterDeleteRelation,

    // ─────────────────────────────────────────────────────────────────────────
    // System Events
    // ─────────────────────────────────────────────────────────────────────────
    /// The server finished starting.
    ServerStartup,
    /// The server runs a maintenance task.
    ServerMaintenance,
    /// The server is shutting down.
    ServerShutdown,
    /// The server is about to shut down.
    BeforeServerShutdown,
    /// A backup is being taken.
    ServerBackup,
    /// A backup is being restored.
    ServerRestore,
    /// A session was opened.
    SessionOpen,
    /// A session is being closed.
    SessionClose,
}

impl Event {
    /// Every event of the taxonomy.
    pub const ALL: [Event; 18] = [
        Event::BeforeAddEntity,
        Event::AfterAddEntity,
        Event::BeforeUpdateEntity,
        Event::AfterUpdateEntity,
        Event::BeforeDeleteEntity,
        Event::AfterDeleteEntity,
        Event::BeforeAddRelation,
        Event::AfterAddRelation,
        Event::BeforeDeleteRelation,
        Event::AfterDeleteRelation,
        Event::ServerStartup,
        Event::ServerMaintenance,
        Event::ServerShutdown,
        Event::BeforeServerShutdown,
        Event::ServerBackup,
        Event::ServerRestore,
        Event::SessionOpen,
        Event::SessionClose,
    ];

    /// Returns the event's canonical name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Event::BeforeAddEntity => "before_add_entity",
            Event::AfterAddEntity => "after_add_entity",
            Event::BeforeUpdateEntity => "before_update_entity",
            Event::AfterUpdateEntity => "after_update_entity",
            Event::BeforeDeleteEntity => "before_delete_entity",
            Event::AfterDeleteEntity => "after_delete_entity",
            Event::BeforeAddRelation => "before_add_relation",
            Event::AfterAddRelation => "after_add_relation",
            Event::BeforeDeleteRelation => "before_delete_relation",
            Event::AfterDeleteRelation => "after_delete_relation",
            Event::ServerStartup => "server_startup",
            Event::ServerMaintenance => "server_maintenance",
            Event::ServerShutdown => "server_shutdown",
            Event::BeforeServerShutdown => "before_server_shutdown",
            Event::ServerBackup => "server_backup",
            Event::ServerRestore => "server_restore",
            Event::SessionOpen => "session_open",
            Event::SessionClose => "session_close",
        }
    }

    /// Returns the family this event belongs to.
    #[must_use]
    pub fn family(self) -> EventFamily {
        match self {
            Event::BeforeAddEntity
            | Event::AfterAddEntity
            | Event::BeforeUpdateEntity
            | Event::AfterUpdateEntity
            | Event::BeforeDeleteEntity
            | Event::AfterDeleteEntity => EventFamily::Entity,
            Event::BeforeAddRelation
            | Event::AfterAddRelation
            | Event::BeforeDeleteRelation
            | Event::AfterDeleteRelation => EventFamily::Relation,
            Event::ServerStartup
            | Event::ServerMaintenance
            | Event::ServerShutdown
            | Event::BeforeServerShutdown
            | Event::ServerBackup
            | Event::ServerRestore
            | Event::SessionOpen
            | Event::SessionClose => EventFamily::System,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a name outside the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for Event {
    type Err = UnknownEvent;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|event| event.as_str() == name)
            .ok_or_else(|| UnknownEvent(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for event in Event::ALL {
            assert_eq!(event.as_str().parse::<Event>(), Ok(event));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "after_add_entities".parse::<Event>().unwrap_err();
        assert_eq!(err, UnknownEvent("after_add_entities".into()));
        assert_eq!(err.to_string(), "unknown event 'after_add_entities'");
    }

    #[test]
    fn families_partition_the_taxonomy() {
        let count = |family| Event::ALL.iter().filter(|e| e.family() == family).count();
        assert_eq!(count(EventFamily::Entity), 6);
        assert_eq!(count(EventFamily::Relation), 4);
        assert_eq!(count(EventFamily::System), 8);
    }

    #[test]
    fn display_uses_canonical_name() {
        assert_eq!(Event::BeforeServerShutdown.to_string(), "before_server_shutdown");
    }
}
