//! Tracking state carried by every trackable entity.
//!
//! # State machine
//!
//! ```text
//! (none)/Detached --insert--> Added
//! (none)/Detached --attach--> Unchanged
//! Unchanged --update (diff non-empty)--> Modified
//! Unchanged|Modified --delete--> Deleted
//! Deleted --update (diff non-empty)--> Modified
//! Deleted --update (no diff)--> Unchanged
//! any --detach--> Detached
//! Added|Modified --accept--> Unchanged
//! Deleted --accept--> Detached (evicted)
//! ```
//!
//! Transitions are applied by the repository and the unit of work only.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::id::EntityToken;

/// Lifecycle tag governing how a pending change is applied on commit.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    #[default]
    Detached,
}

impl TrackingState {
    /// Whether a commit has to flush this entity.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }

    /// State after the store acknowledged the change.
    pub fn accepted(self) -> TrackingState {
        match self {
            Self::Deleted | Self::Detached => Self::Detached,
            Self::Added | Self::Modified | Self::Unchanged => Self::Unchanged,
        }
    }
}

/// Plain-value copy of a tracking handle.
///
/// Used when tracking metadata has to cross a serialization boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub token: EntityToken,
    pub state: TrackingState,
    #[serde(default)]
    pub modified_properties: BTreeSet<String>,
}

impl TrackingSnapshot {
    fn fresh(token: EntityToken) -> Self {
        Self {
            token,
            state: TrackingState::Detached,
            modified_properties: BTreeSet::new(),
        }
    }
}

/// Shared tracking handle embedded in an entity.
///
/// Clones share the same cell: a cloned entity is the same logical entity, so
/// a transition applied by the repository is visible through every clone.
/// Use [`Tracking::fork`] for an independent copy.
///
/// Tracking metadata never takes part in structural equality: two handles
/// always compare equal.
#[derive(Debug, Clone)]
pub struct Tracking {
    inner: Arc<RwLock<TrackingSnapshot>>,
}

impl Default for Tracking {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Tracking {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for Tracking {}

impl Tracking {
    pub fn new() -> Self {
        Self::with_token(EntityToken::new())
    }

    /// A detached handle bound to an existing identity token.
    pub fn with_token(token: EntityToken) -> Self {
        Self::restore(TrackingSnapshot::fresh(token))
    }

    /// Rebuild a handle from metadata received across a boundary.
    pub fn restore(snapshot: TrackingSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Independent, detached handle with a fresh token.
    pub fn fork(&self) -> Self {
        Self::new()
    }

    pub fn token(&self) -> EntityToken {
        self.read(|s| s.token)
    }

    pub fn state(&self) -> TrackingState {
        self.read(|s| s.state)
    }

    pub fn modified_properties(&self) -> BTreeSet<String> {
        self.read(|s| s.modified_properties.clone())
    }

    pub fn is_property_modified(&self, name: &str) -> bool {
        self.read(|s| s.modified_properties.contains(name))
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.read(Clone::clone)
    }

    /// Whether both handles point at the same cell.
    pub fn shares_cell_with(&self, other: &Tracking) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Apply a transition. The modified set is cleared unless the new state
    /// is `Modified`.
    pub fn transition(&self, state: TrackingState, modified: BTreeSet<String>) {
        let mut cell = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        cell.state = state;
        cell.modified_properties = if state == TrackingState::Modified {
            modified
        } else {
            BTreeSet::new()
        };
    }

    /// Record a state on a value that is not (yet) tracked, e.g. before
    /// shipping it across a boundary for `apply_changes`.
    pub fn mark(&self, state: TrackingState) {
        self.transition(state, self.modified_properties());
    }

    fn read<R>(&self, f: impl FnOnce(&TrackingSnapshot) -> R) -> R {
        let cell = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&cell)
    }
}
