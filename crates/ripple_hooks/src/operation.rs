//! Deferred commit-time work.
//!
//! Hooks react to mutations as they happen; anything that must wait until
//! the whole transaction is known (integrity checks over the final state,
//! file cleanup, notifications) is registered as an [`Operation`] and runs
//! at commit or rollback.
//!
//! Commit runs, in queue order, every operation's `precommit_event`, then
//! the backend commit, then every `postcommit_event`. If a precommit fails,
//! already processed operations get `revertprecommit_event` in reverse, then
//! every operation gets `rollback_event`.

use core::fmt;
use std::error::Error as StdError;

use downcast_rs::{Downcast, impl_downcast};

use crate::batch::DataOperationError;
use crate::transaction::{Transaction, TransactionError};

/// Error returned by an operation callback.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The operation rejected the transaction.
    #[error("{0}")]
    Failed(String),
    /// A filesystem call failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A mutation issued from the operation failed.
    #[error(transparent)]
    Transaction(Box<TransactionError>),
    /// Draining the operation's batch failed.
    #[error(transparent)]
    Data(#[from] DataOperationError),
    /// A collaborator (mailer, external service) failed.
    #[error(transparent)]
    External(Box<dyn StdError + Send + Sync>),
}

impl OperationError {
    /// Creates an [`OperationError::Failed`] from a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        OperationError::Failed(message.into())
    }
}

impl From<TransactionError> for OperationError {
    fn from(err: TransactionError) -> Self {
        OperationError::Transaction(Box::new(err))
    }
}

/// Queue zone an operation is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationKind {
    /// Runs in registration order, before late ones.
    #[default]
    Ordinary,
    /// Runs after every ordinary operation.
    Late,
    /// Runs after every late operation; at most one instance per type.
    SingleLast,
}

/// Identifier assigned to an operation when it is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Last commit phase an operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// `precommit_event` returned successfully.
    Precommit,
    /// `postcommit_event` returned successfully.
    Postcommit,
}

/// Work bound to one transaction.
///
/// Every callback defaults to doing nothing. Callbacks receive the
/// transaction mutably; the operation itself has been taken out of the
/// queue while it runs, so it may register further operations.
pub trait Operation: Downcast + Send {
    /// Queue zone this operation goes to.
    fn kind(&self) -> OperationKind {
        OperationKind::Ordinary
    }

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Runs before the backend commit. An error aborts the commit.
    ///
    /// # Errors
    ///
    /// Returns an error to veto the commit.
    fn precommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        Ok(())
    }

    /// Undoes a successful `precommit_event` after a later one failed.
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    fn revertprecommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        Ok(())
    }

    /// Runs after the backend commit succeeded.
    ///
    /// # Errors
    ///
    /// Errors are logged and reported, the commit stands.
    fn postcommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        Ok(())
    }

    /// Runs when the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    fn rollback_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        Ok(())
    }
}

impl_downcast!(Operation);
