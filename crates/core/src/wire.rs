//! Envelope for shipping tracked entities across a serialization boundary.
//!
//! Entities never serialize their tracking handle (storage rows must not
//! carry it). When a graph travels to a client and back, wrap each entity in
//! [`Tracked`] so its state and modified-property set survive the trip, then
//! hand the restored entities to `apply_changes`.

use serde::{Deserialize, Serialize};

use crate::entity::Trackable;
use crate::tracking::{Tracking, TrackingSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracked<E> {
    #[serde(flatten)]
    pub entity: E,
    #[serde(rename = "_tracking")]
    pub tracking: TrackingSnapshot,
}

impl<E: Trackable + Clone> Tracked<E> {
    pub fn capture(entity: &E) -> Self {
        Self {
            entity: entity.clone(),
            tracking: entity.tracking().snapshot(),
        }
    }
}

impl<E: Trackable> Tracked<E> {
    /// Entity with a fresh handle restored from the shipped metadata.
    pub fn into_entity(self) -> E {
        let mut entity = self.entity;
        *entity.tracking_mut() = Tracking::restore(self.tracking);
        entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::TrackingState;
    use std::collections::BTreeSet;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Shipper {
        shipper_id: i64,
        company_name: String,
        #[serde(skip)]
        tracking: Tracking,
    }

    impl Trackable for Shipper {
        fn tracking(&self) -> &Tracking {
            &self.tracking
        }

        fn tracking_mut(&mut self) -> &mut Tracking {
            &mut self.tracking
        }
    }

    #[test]
    fn tracking_survives_json_round_trip() {
        let shipper = Shipper {
            shipper_id: 1,
            company_name: "Speedy Express".into(),
            ..Default::default()
        };
        shipper.tracking.transition(
            TrackingState::Modified,
            BTreeSet::from(["company_name".to_string()]),
        );

        let json = serde_json::to_string(&Tracked::capture(&shipper)).unwrap();
        let received: Tracked<Shipper> = serde_json::from_str(&json).unwrap();
        let restored = received.into_entity();

        assert_eq!(restored, shipper);
        assert_eq!(restored.tracking.token(), shipper.tracking.token());
        assert_eq!(restored.tracking.state(), TrackingState::Modified);
        assert!(restored.tracking.is_property_modified("company_name"));
        assert!(!restored.tracking.shares_cell_with(&shipper.tracking));
    }
}
