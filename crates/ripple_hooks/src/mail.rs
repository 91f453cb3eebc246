//! Notification mails sent once a transaction is committed.
//!
//! Hooks queue messages with [`SendMailOp::queue`]; every message queued in
//! a transaction is handed to the [`Mailer`] in one batch after commit, and
//! dropped if the transaction rolls back.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::operation::{Operation, OperationError, OperationKind};
use crate::transaction::Transaction;

/// Error returned by a [`Mailer`].
pub type MailError = Box<dyn StdError + Send + Sync>;

/// A notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl Message {
    /// Creates a message.
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Delivers messages.
pub trait Mailer: Send + Sync + 'static {
    /// Sends every message to its recipients.
    ///
    /// # Errors
    ///
    /// Returns the delivery failure.
    fn send(&self, batch: &[(Message, Vec<String>)]) -> Result<(), MailError>;
}

/// Sends the messages queued in a transaction after commit.
///
/// A single instance exists per transaction: queueing replaces the previous
/// instance and takes over its messages.
pub struct SendMailOp {
    mailer: Arc<dyn Mailer>,
    to_send: Vec<(Message, Vec<String>)>,
}

impl SendMailOp {
    /// Creates an operation with one message.
    pub fn new(mailer: Arc<dyn Mailer>, message: Message, recipients: Vec<String>) -> Self {
        Self {
            mailer,
            to_send: vec![(message, recipients)],
        }
    }

    /// Queues `message` for `recipients`, after any message already queued
    /// in this transaction.
    pub fn queue(
        tx: &mut Transaction,
        mailer: Arc<dyn Mailer>,
        message: Message,
        recipients: Vec<String>,
    ) {
        tx.add_single_last_merged(Self::new(mailer, message, recipients), |current, previous| {
            let mut merged = previous.to_send;
            merged.append(&mut current.to_send);
            current.to_send = merged;
        });
    }

    /// Returns the queued messages.
    #[must_use]
    pub fn messages(&self) -> &[(Message, Vec<String>)] {
        &self.to_send
    }
}

impl Operation for SendMailOp {
    fn kind(&self) -> OperationKind {
        OperationKind::SingleLast
    }

    fn name(&self) -> &str {
        "send_mail"
    }

    fn postcommit_event(&mut self, _tx: &mut Transaction) -> Result<(), OperationError> {
        let batch = core::mem::take(&mut self.to_send);
        if batch.is_empty() {
            return Ok(());
        }
        tracing::info!(messages = batch.len(), "sending notification mails");
        self.mailer.send(&batch).map_err(OperationError::External)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::manager::HooksManager;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Vec<(Message, Vec<String>)>>>,
    }

    impl Mailer for Outbox {
        fn send(&self, batch: &[(Message, Vec<String>)]) -> Result<(), MailError> {
            self.sent.lock().push(batch.to_vec());
            Ok(())
        }
    }

    struct Offline;

    impl Mailer for Offline {
        fn send(&self, _batch: &[(Message, Vec<String>)]) -> Result<(), MailError> {
            Err("smtp unreachable".into())
        }
    }

    fn open() -> Transaction {
        Transaction::new(HooksManager::default(), MemoryStore::new().begin())
    }

    #[test]
    fn messages_are_merged_into_one_batch() {
        let outbox = Arc::new(Outbox::default());
        let mut tx = open();
        SendMailOp::queue(&mut tx, outbox.clone(), Message::new("one", ""), vec!["a@x".into()]);
        SendMailOp::queue(&mut tx, outbox.clone(), Message::new("two", ""), vec!["b@x".into()]);
        assert_eq!(tx.pending_operations().len(), 1);

        tx.commit().unwrap();

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 1);
        let subjects: Vec<&str> = sent[0].iter().map(|(m, _)| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["one", "two"]);
    }

    #[test]
    fn rollback_sends_nothing() {
        let outbox = Arc::new(Outbox::default());
        let mut tx = open();
        SendMailOp::queue(&mut tx, outbox.clone(), Message::new("one", ""), vec![]);
        tx.rollback().unwrap();
        assert!(outbox.sent.lock().is_empty());
    }

    #[test]
    fn delivery_failure_does_not_fail_commit() {
        let mut tx = open();
        SendMailOp::queue(&mut tx, Arc::new(Offline), Message::new("one", ""), vec![]);

        let report = tx.commit().unwrap();

        assert_eq!(report.postcommit_failures.len(), 1);
        assert_eq!(report.postcommit_failures[0].operation, "send_mail");
        assert_eq!(report.postcommit_failures[0].error.to_string(), "smtp unreachable");
    }
}
