use crate::error::{PersistenceError, ResultExt};
use crate::session::UnitOfWork;
use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Succeeded,
    Failed,
    Closed,
}

/// A scope over the unit of work of one session.
///
/// A transaction begun while work is already pending joins it and leaves the outcome to the owner.
/// An owning transaction commits on close when marked successful and rolls back otherwise.
/// Owned by the thread that began it.
pub struct Transaction<'s> {
    work: &'s dyn UnitOfWork,
    owner: bool,
    state: TransactionState,
}

impl<'s> Transaction<'s> {
    pub fn begin(work: &'s dyn UnitOfWork) -> Result<Self, PersistenceError> {
        let owner = !work.pending_work();
        if owner {
            work.begin_work().context("beginning transaction")?;
        }
        debug!("transaction begun, owner: {owner}");
        Ok(Self { work, owner, state: TransactionState::Active })
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Runs `worker` unless the transaction already failed, an error from it fails the transaction.
    pub fn execute<T, F>(&mut self, worker: F) -> Result<T, PersistenceError>
    where
        F: FnOnce() -> Result<T, PersistenceError>,
    {
        match self.state {
            TransactionState::Failed => return Err(PersistenceError::TransactionFailed("already marked failed".into())),
            TransactionState::Closed => return Err(PersistenceError::TransactionFailed("already closed".into())),
            _ => {}
        }
        worker().map_err(|e| {
            self.state = TransactionState::Failed;
            PersistenceError::Context { context: "transaction failed".into(), source: Box::new(e) }
        })
    }

    /// A failed transaction stays failed.
    pub fn success(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Succeeded;
        }
    }

    pub fn failure(&mut self) {
        if self.state != TransactionState::Closed {
            self.state = TransactionState::Failed;
        }
    }

    /// Commits or rolls back when owning, otherwise does nothing.
    pub fn close(mut self) -> Result<(), PersistenceError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), PersistenceError> {
        let state = std::mem::replace(&mut self.state, TransactionState::Closed);
        if state == TransactionState::Closed || !self.owner {
            return Ok(());
        }
        if state == TransactionState::Succeeded {
            debug!("committing transaction");
            self.work.commit_work().or_else(|e| {
                crate::error!("commit failed, rolling back: {e}");
                self.work.rollback_work().context("rolling back after failed commit")?;
                Err(e)
            })
            .context("committing transaction")
        } else {
            debug!("rolling back transaction in state {state:?}");
            self.work.rollback_work().context("rolling back transaction")
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            crate::error!("closing transaction failed: {e}");
        }
    }
}

/// Something able to run work inside a transaction.
pub trait Transactional {
    fn begin_transaction(&self) -> Result<Transaction<'_>, PersistenceError>;

    /// Begins, runs `worker`, and commits when it succeeds or rolls back when it fails.
    fn with_transaction<T, F>(&self, worker: F) -> Result<T, PersistenceError>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, PersistenceError>,
    {
        let mut tx = self.begin_transaction()?;
        match tx.execute(|| worker(self)) {
            Ok(value) => {
                tx.success();
                tx.close()?;
                Ok(value)
            }
            Err(e) => {
                tx.failure();
                if let Err(close) = tx.close() {
                    crate::error!("rollback after failed transaction failed: {close}");
                }
                Err(e)
            }
        }
    }
}
