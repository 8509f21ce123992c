//! `tessera-mapping`: explicit, statically registered domain ↔ entity mapping.
//!
//! Mapping is configured once at startup into a [`MapperConfiguration`] and
//! handed by reference to every consumer; there is no process-wide mapping
//! state. Unregistered pairs are rejected when a [`Mapper`] is resolved,
//! never in the middle of a call.

pub mod configuration;
pub mod mapper;
pub mod model;
pub mod property;

pub use configuration::{MapperConfiguration, MapperConfigurationBuilder};
pub use mapper::Mapper;
pub use model::DomainModel;
pub use property::PropertyPair;
