//! Hook dispatch and transactional operations for ripple (Layer 2).
//!
//! `ripple_hooks` reacts to entity and relation mutations. Hooks run
//! synchronously as mutations happen; operations queued by hooks run when
//! the transaction commits or rolls back.
//!
//! # Core Concepts
//!
//! - [`Event`](events::Event) - The closed set of events hooks subscribe to
//! - [`Selector`](selector::Selector) - Scored predicate choosing which hooks fire
//! - [`Hook`](hook::Hook) - Event handler with an id, category, order and selector
//! - [`HooksManager`](manager::HooksManager) - Registry and dispatcher
//! - [`Operation`](operation::Operation) - Deferred precommit/postcommit/rollback work
//! - [`DataOperation`](batch::DataOperation) - Operation batching data across hook calls
//! - [`Transaction`](transaction::Transaction) - Mutation context running both
//!
//! # Example
//!
//! ```
//! use ripple_hooks::prelude::*;
//! use serde_json::json;
//!
//! let hooks = HooksManager::default();
//! hooks
//!     .register(
//!         FnHook::new("default_status", &["before_add_entity"], |cx| {
//!             if let Some(ticket) = cx.entity_mut() {
//!                 if ticket.get("status").is_none() {
//!                     ticket.set("status", "open");
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_selector(IsInstance::new(["Ticket"])),
//!     )
//!     .unwrap();
//!
//! let store = MemoryStore::new();
//! let mut tx = Transaction::new(hooks.clone(), store.begin());
//! let ticket = tx.create_entity("Ticket", Attributes::new()).unwrap();
//! tx.commit().unwrap();
//!
//! assert_eq!(store.entity(ticket).unwrap().get("status"), Some(&json!("open")));
//! ```
//!
//! # Architecture
//!
//! - **Layer 1** (`ripple_system`): build-phase primitives
//! - **Layer 2** (`ripple_hooks`): hook and operation engine (this crate)
//! - **Layer 1** (`ripple_core_plugins`): infrastructure plugins (tracing)

/// Storage seen by a transaction.
pub mod backend;

/// Operations that accumulate data across hook calls.
pub mod batch;

/// Per-transaction scratch data.
pub mod data;

/// Entities, attributes and relation references.
pub mod entity;

/// The event taxonomy.
pub mod events;

/// Stock file operations.
pub mod fileops;

/// Hook trait, hook context and closure hooks.
pub mod hook;

/// Stock mail notification operation.
pub mod mail;

/// Hook registration and dispatch.
pub mod manager;

/// Deferred operation trait.
pub mod operation;

/// The pending operation queue.
pub mod pending;

/// Server integration.
pub mod plugin;

/// Stock relation propagation hooks.
pub mod propagate;

/// Per-event hook registries.
pub mod registry;

/// Scored hook selectors.
pub mod selector;

/// The transaction context.
pub mod transaction;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::backend::{Backend, BackendError, MemoryBackend, MemoryStore};
    pub use crate::batch::{BatchPayload, Container, DataOperation, DataOperationError};
    pub use crate::data::{DataKey, TransactionData};
    pub use crate::entity::{Attributes, Eid, Entity, RelationRef, Role};
    pub use crate::events::{Event, EventFamily};
    pub use crate::hook::{FnHook, Hook, HookArgs, HookContext, HookError};
    pub use crate::manager::{DispatchError, HooksManager, TemporaryHook};
    pub use crate::operation::{Operation, OperationError, OperationId, OperationKind};
    pub use crate::plugin::{HooksConfig, HooksPlugin};
    pub use crate::registry::HookRegistrationError;
    pub use crate::selector::{
        Always, And, FnSelector, IsInstance, MatchRtype, Not, Or, Score, SelectContext, Selector,
        SelectorExt,
    };
    pub use crate::transaction::{
        CommitReport, HooksMode, Transaction, TransactionError, TransactionState,
    };
}

// Re-export key types at crate root for convenience
pub use manager::HooksManager;
pub use plugin::{HooksConfig, HooksPlugin};
pub use transaction::Transaction;
