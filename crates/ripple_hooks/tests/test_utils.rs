//! Shared test utilities for `ripple_hooks` integration tests.
//!
//! This module provides journaling hooks and operations used across
//! multiple test files. Import via `mod test_utils;` in test files.

#![allow(
    dead_code,
    missing_docs,
    reason = "shared test utilities, not all items used in every test binary"
)]

use std::sync::Arc;

use parking_lot::Mutex;
use ripple_hooks::backend::MemoryStore;
use ripple_hooks::hook::FnHook;
use ripple_hooks::manager::HooksManager;
use ripple_hooks::operation::{Operation, OperationError, OperationKind};
use ripple_hooks::plugin::HooksPlugin;
use ripple_hooks::transaction::Transaction;
use ripple_system::server::Server;

// ═══════════════════════════════════════════════════════════════════════════════
// JOURNAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered record of what hooks and operations did.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Entries starting with `prefix`.
    pub fn filtered(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOOKS
// ═══════════════════════════════════════════════════════════════════════════════

/// A hook journaling `"{label}@{event}"`, plus the entity type or the
/// relation it fired for.
pub fn recording_hook(journal: &Journal, id: &str, label: &'static str, events: &[&'static str]) -> FnHook {
    let journal = journal.clone();
    FnHook::new(id, events, move |cx| {
        let target = match (cx.entity(), cx.relation()) {
            (Some(entity), _) => format!(" {}", entity.etype()),
            (_, Some(relation)) => format!(" {}", relation.rtype),
            _ => String::new(),
        };
        journal.push(format!("{label}@{}{target}", cx.event()));
        Ok(())
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Which callback of a [`RecordingOp`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Nowhere,
    Precommit,
    Revert,
    Rollback,
    Postcommit,
}

/// An operation journaling each callback as `"{label}:{callback}"`.
pub struct RecordingOp {
    pub label: String,
    pub kind: OperationKind,
    pub fail_at: FailAt,
    pub journal: Journal,
}

impl RecordingOp {
    pub fn new(journal: &Journal, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: OperationKind::Ordinary,
            fail_at: FailAt::Nowhere,
            journal: journal.clone(),
        }
    }

    pub fn late(mut self) -> Self {
        self.kind = OperationKind::Late;
        self
    }

    pub fn failing(mut self, at: FailAt) -> Self {
        self.fail_at = at;
        self
    }

    fn record(&self, callback: &str, at: FailAt) -> Result<(), OperationError> {
        self.journal.push(format!("{}:{callback}", self.label));
        if self.fail_at == at {
            Err(OperationError::failed(format!("{} refused {callback}", self.label)))
        } else {
            Ok(())
        }
    }
}

impl Operation for RecordingOp {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn precommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        self.record("precommit", FailAt::Precommit)
    }

    fn revertprecommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        self.record("revert", FailAt::Revert)
    }

    fn rollback_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        self.record("rollback", FailAt::Rollback)
    }

    fn postcommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        self.record("postcommit", FailAt::Postcommit)
    }
}

/// Single-last operation journaling its precommit with the labels it
/// accumulated.
pub struct SummaryOp {
    pub labels: Vec<String>,
    pub journal: Journal,
}

impl Operation for SummaryOp {
    fn kind(&self) -> OperationKind {
        OperationKind::SingleLast
    }

    fn precommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        self.journal.push(format!("summary:{}", self.labels.join(",")));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SETUP
// ═══════════════════════════════════════════════════════════════════════════════

/// Opens a transaction on a fresh in-memory store.
pub fn open(hooks: &HooksManager) -> (MemoryStore, Transaction) {
    let store = MemoryStore::new();
    let tx = Transaction::new(hooks.clone(), store.begin());
    (store, tx)
}

/// Builds a server with the given hooks plugin and returns its manager.
pub fn build_server(plugin: HooksPlugin) -> (Server, HooksManager) {
    let mut server = Server::new();
    server.add_plugins(plugin);
    server.finish();
    let hooks = server
        .api::<HooksManager>()
        .cloned()
        .expect("HooksPlugin installs the manager");
    (server, hooks)
}
