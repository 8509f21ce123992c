//! Domain-model contract.

use tessera_core::{EntityToken, TrackingState};

/// Application-facing value shape.
///
/// A domain model has no tracking state of its own. It only carries the
/// identity token of the entity it was mapped from, so that mapping it back
/// yields an entity the tracked-set recognizes. Implementors usually keep the
/// token in a `#[serde(skip)]` field initialized by `Default`.
pub trait DomainModel: Default + Clone + Send + Sync + 'static {
    fn token(&self) -> EntityToken;

    fn set_token(&mut self, token: EntityToken);

    /// State recorded by a client that edited this model outside a session.
    ///
    /// Only consulted by `apply_changes`; `None` reads as `Detached`.
    fn shipped_state(&self) -> Option<TrackingState> {
        None
    }
}
