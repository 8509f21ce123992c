//! Infrastructure layer: stores, change tracking and the unit of work.
//!
//! - [`store`]: the `DataStore` boundary plus in-memory and Postgres engines
//! - [`session`]: shared tracker for the repositories of one logical operation
//! - [`repository`]: change-tracking repositories over entity sets
//! - [`unit_of_work`]: atomic commit of a session's pending changes

pub mod config;
pub mod repository;
pub mod session;
pub mod store;
pub mod unit_of_work;

mod tracker;


pub use config::StoreConfig;
pub use repository::{Repository, TrackableRepository};
pub use session::Session;
pub use store::{ChangeBatch, ChangeKind, DataStore, InMemoryStore, RowChange};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use unit_of_work::UnitOfWork;
