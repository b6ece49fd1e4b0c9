//! Compensating-action pseudo-transactions.
//!
//! The device has no true transactional storage, so a "transaction" here is
//! just a list of compensating actions an operation pushes as it goes
//! (currently only "delete file X"), run in LIFO order on an explicit
//! rollback. Commit discards them.
//!
//! Rust's `Drop` cannot run async code, so a `Transaction` dropped without
//! `commit`/`rollback` cannot itself talk to the device. Instead it moves
//! its recorded actions into a cell shared with the owning `Session`; every
//! public `Session` entry point drains and runs that cell's actions before
//! doing its own work, which is what makes "rolls back automatically" hold
//! without an async destructor.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Result, SessionError};
use crate::Session;

/// A single compensating action. "Delete file X" is the only kind
/// described so far; more kinds would be added here as the set of
/// transactional operations grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensatingAction {
    DeleteFile(String),
}

pub(crate) type PendingRollbacks = Rc<RefCell<Vec<CompensatingAction>>>;

/// A scoped list of compensating actions pushed by the operation that opened
/// it. Must be resolved with `commit()` or `rollback()`; if dropped
/// unresolved its actions are handed to the owning `Session` and run before
/// that session's next operation.
pub struct Transaction {
    actions: Vec<CompensatingAction>,
    pending: PendingRollbacks,
    resolved: bool,
}

impl Transaction {
    pub(crate) fn new(pending: PendingRollbacks) -> Self {
        Self { actions: Vec::new(), pending, resolved: false }
    }

    /// Record "delete this remote file" as the compensating action for
    /// whatever the caller is about to do (e.g. a write that might fail
    /// partway through).
    pub fn defer_delete_file(&mut self, path: impl Into<String>) {
        self.actions.push(CompensatingAction::DeleteFile(path.into()));
    }

    /// Discards the recorded actions without running them. A transaction
    /// already committed or rolled back is an error — committing a
    /// transaction that was already rolled back (or vice versa) must be
    /// detected rather than silently allowed.
    pub fn commit(&mut self) -> Result<()> {
        if self.resolved {
            return Err(SessionError::TransactionAlreadyResolved);
        }
        self.resolved = true;
        self.actions.clear();
        Ok(())
    }

    /// Runs the recorded actions against `session` in LIFO order, then
    /// marks the transaction resolved.
    pub async fn rollback(&mut self, session: &mut Session) -> Result<()> {
        if self.resolved {
            return Err(SessionError::TransactionAlreadyResolved);
        }
        self.resolved = true;
        while let Some(action) = self.actions.pop() {
            session.run_compensating(action).await?;
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.resolved {
            self.pending.borrow_mut().extend(self.actions.drain(..));
        }
    }
}
