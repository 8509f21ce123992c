//! `tessera-core`: change-tracking building blocks.
//!
//! This crate contains the tracking state model, entity/key contracts and the
//! lazy query pipeline. It performs no IO itself; stores plug in through
//! [`RowSource`] and the infra crate's `DataStore`.

pub mod entity;
pub mod error;
pub mod id;
pub mod key;
pub mod property;
pub mod query;
pub mod tracking;
pub mod wire;

pub use entity::{Entity, EntitySet, Navigation, NavigationKind, Row, Trackable};
pub use error::{DataError, DataResult, ErrorKind, StoreError};
pub use id::{EntityToken, SessionId};
pub use key::{Key, KeyValue};
pub use property::Property;
pub use query::{Query, RowSource};
pub use tracking::{Tracking, TrackingSnapshot, TrackingState};
pub use wire::Tracked;
