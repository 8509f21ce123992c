//! Session: one store handle plus one change tracker.

use std::sync::{Arc, Mutex, MutexGuard};

use tessera_core::{DataError, DataResult, Entity, SessionId};

use crate::repository::Repository;
use crate::store::DataStore;
use crate::tracker::ChangeTracker;
use crate::unit_of_work::UnitOfWork;

/// Shared context of the repositories and the unit of work of one logical
/// operation.
///
/// Clones share the tracker. A session is not meant to be driven from
/// several tasks at once: the tracker lock only guards against data races,
/// not against interleaved operations.
pub struct Session<S> {
    id: SessionId,
    store: Arc<S>,
    tracker: Arc<Mutex<ChangeTracker>>,
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            store: Arc::clone(&self.store),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<S: DataStore + 'static> Session<S> {
    pub fn new(store: Arc<S>) -> Self {
        let id = SessionId::new();
        tracing::debug!(session_id = %id, "session opened");
        Self {
            id,
            store,
            tracker: Arc::new(Mutex::new(ChangeTracker::default())),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn repository<E: Entity>(&self) -> Repository<E, S> {
        Repository::new(self.clone())
    }

    pub fn unit_of_work(&self) -> UnitOfWork<S> {
        UnitOfWork::new(self.clone())
    }

    /// Number of entities currently tracked.
    pub fn tracked_count(&self) -> DataResult<usize> {
        Ok(self.tracker()?.len())
    }

    pub(crate) fn tracker(&self) -> DataResult<MutexGuard<'_, ChangeTracker>> {
        self.tracker
            .lock()
            .map_err(|_| DataError::invalid_data("change tracker lock poisoned"))
    }
}
