//! Unit of work: flushes a session's pending changes as one atomic batch.
//!
//! ## Cancellation
//!
//! `commit()` snapshots the pending changes, releases the tracker, and only
//! then awaits the store. Dropping the future before the store call starts
//! leaves both the store and the tracker untouched. Dropping it while the
//! store call is in flight leaves the outcome to the store's atomicity
//! guarantee: the batch either landed completely or not at all, but the
//! tracker still reports the entries as pending. Discard the session in
//! that case instead of committing it again.

use tessera_core::{DataError, DataResult};

use crate::session::Session;
use crate::store::{ChangeBatch, DataStore};

#[derive(Debug)]
pub struct UnitOfWork<S> {
    session: Session<S>,
}

impl<S: DataStore + 'static> UnitOfWork<S> {
    pub fn new(session: Session<S>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Number of entities with a change to flush.
    pub fn pending_count(&self) -> DataResult<usize> {
        Ok(self.session.tracker()?.pending_count())
    }

    /// Persist every pending change atomically and return the store's count
    /// of persisted changes.
    ///
    /// On success added and modified entities become `Unchanged` and deleted
    /// ones are evicted. On failure the error wraps the store's cause and no
    /// tracking state changes.
    pub async fn commit(self) -> DataResult<usize> {
        let pending = self.session.tracker()?.pending();
        if pending.is_empty() {
            tracing::debug!(session_id = %self.session.id(), "nothing to commit");
            return Ok(0);
        }

        let (tokens, changes): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let batch = ChangeBatch { changes };
        let size = batch.len();

        match self.session.store().commit(batch).await {
            Ok(persisted) => {
                self.session.tracker()?.accept_committed(&tokens);
                tracing::info!(
                    session_id = %self.session.id(),
                    changes = size,
                    persisted,
                    "unit of work committed"
                );
                Ok(persisted)
            }
            Err(cause) => {
                tracing::warn!(
                    session_id = %self.session.id(),
                    changes = size,
                    error = %cause,
                    "unit of work commit failed"
                );
                Err(DataError::CommitFailed(cause))
            }
        }
    }

    /// Discard pending changes: added entities are detached, modified and
    /// deleted ones revert to `Unchanged`.
    pub fn rollback(self) -> DataResult<()> {
        let mut tracker = self.session.tracker()?;
        let discarded = tracker.pending_count();
        tracker.rollback();
        tracing::debug!(session_id = %self.session.id(), discarded, "unit of work rolled back");
        Ok(())
    }
}
