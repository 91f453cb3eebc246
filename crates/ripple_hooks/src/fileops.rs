//! Stock operations keeping files consistent with the transaction outcome.
//!
//! Files written while a transaction runs are recorded with
//! [`AddFileOp::record`] and removed if it rolls back. Files that should
//! disappear along with deleted data are recorded with
//! [`DeleteFileOp::record`] and removed only once the commit is durable.

use std::io;
use std::path::{Path, PathBuf};

use crate::batch::{BatchPayload, DataOperation, DataOperationError};
use crate::operation::{Operation, OperationError};
use crate::transaction::Transaction;

fn remove_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AddFileOp
// ─────────────────────────────────────────────────────────────────────────────

/// Removes files created during the transaction if it rolls back.
#[derive(Debug, Default)]
pub struct AddFileOp {
    paths: BatchPayload<PathBuf>,
}

impl AddFileOp {
    /// Records a file written in this transaction.
    ///
    /// # Errors
    ///
    /// Fails if the queued instance was already drained.
    pub fn record(tx: &mut Transaction, path: impl Into<PathBuf>) -> Result<(), DataOperationError> {
        Self::add_data_to(tx, Self::default, path.into())
    }
}

impl Operation for AddFileOp {
    fn name(&self) -> &str {
        "add_file"
    }

    fn rollback_event(&mut self, tx: &mut Transaction) -> Result<(), OperationError> {
        for path in self.get_data(tx)? {
            if let Err(err) = remove_file(&path) {
                tracing::error!(path = %path.display(), error = %err, "failed to remove file on rollback");
            }
        }
        Ok(())
    }
}

impl DataOperation for AddFileOp {
    type Item = PathBuf;

    fn payload(&self) -> &BatchPayload<PathBuf> {
        &self.paths
    }

    fn payload_mut(&mut self) -> &mut BatchPayload<PathBuf> {
        &mut self.paths
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeleteFileOp
// ─────────────────────────────────────────────────────────────────────────────

/// Removes files once the transaction is committed.
#[derive(Debug, Default)]
pub struct DeleteFileOp {
    paths: BatchPayload<PathBuf>,
}

impl DeleteFileOp {
    /// Records a file to delete after commit.
    ///
    /// # Errors
    ///
    /// Fails if the queued instance was already drained.
    pub fn record(tx: &mut Transaction, path: impl Into<PathBuf>) -> Result<(), DataOperationError> {
        Self::add_data_to(tx, Self::default, path.into())
    }
}

impl Operation for DeleteFileOp {
    fn name(&self) -> &str {
        "delete_file"
    }

    /// Removes every recorded file, returning the first failure after
    /// trying them all. Missing files are not an error.
    fn postcommit_event(&mut self, tx: &mut Transaction) -> Result<(), OperationError> {
        let mut first_error: Option<io::Error> = None;
        for path in self.get_data(tx)? {
            if let Err(err) = remove_file(&path) {
                tracing::error!(path = %path.display(), error = %err, "failed to remove file after commit");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }
}

impl DataOperation for DeleteFileOp {
    type Item = PathBuf;

    fn payload(&self) -> &BatchPayload<PathBuf> {
        &self.paths
    }

    fn payload_mut(&mut self) -> &mut BatchPayload<PathBuf> {
        &mut self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::manager::HooksManager;

    fn open() -> Transaction {
        Transaction::new(HooksManager::default(), MemoryStore::new().begin())
    }

    fn touch(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn added_files_are_removed_on_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (touch(&dir, "a"), touch(&dir, "b"));
        let mut tx = open();
        AddFileOp::record(&mut tx, &a).unwrap();
        AddFileOp::record(&mut tx, &b).unwrap();
        assert_eq!(tx.pending_operations().len(), 1);

        tx.rollback().unwrap();

        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn added_files_survive_commit() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(&dir, "a");
        let mut tx = open();
        AddFileOp::record(&mut tx, &a).unwrap();

        tx.commit().unwrap();

        assert!(a.exists());
    }

    #[test]
    fn deleted_files_go_only_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(&dir, "a");

        let mut tx = open();
        DeleteFileOp::record(&mut tx, &a).unwrap();
        tx.rollback().unwrap();
        assert!(a.exists());

        let mut tx = open();
        DeleteFileOp::record(&mut tx, &a).unwrap();
        DeleteFileOp::record(&mut tx, dir.path().join("missing")).unwrap();
        let report = tx.commit().unwrap();
        assert!(report.is_clean());
        assert!(!a.exists());
    }

    #[test]
    fn undeletable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut tx = open();
        DeleteFileOp::record(&mut tx, dir.path()).unwrap();

        let report = tx.commit().unwrap();

        assert_eq!(report.postcommit_failures.len(), 1);
        assert!(matches!(
            report.postcommit_failures[0].error,
            OperationError::Io(_)
        ));
    }
}
