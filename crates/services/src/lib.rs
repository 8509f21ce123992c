//! `tessera-services`: domain-facing services over change-tracking
//! repositories.
//!
//! A [`DomainService`] speaks domain models to its callers and entities to
//! its repository, translating every value through a [`tessera_mapping::Mapper`]
//! resolved once at construction.

pub mod domain_service;
pub mod named;

pub use domain_service::DomainService;
pub use named::NamedQueries;
