//! Named queries.
//!
//! Named queries are extension traits over [`DomainService`]: an application
//! declares its own trait (e.g. `CustomerQueries::customers_by_company`) and
//! implements it for the service type it uses. [`NamedQueries`] is the
//! name-addressed entry point; services answer `Unsupported` unless a
//! wrapper overrides it.

use tessera_core::{DataError, DataResult, Entity, KeyValue, Query};
use tessera_infra::TrackableRepository;
use tessera_mapping::DomainModel;

use crate::DomainService;

pub trait NamedQueries<D: Send + 'static> {
    fn named_query(&self, name: &str, _params: &[KeyValue]) -> DataResult<Query<D>> {
        Err(DataError::unsupported(format!("no named query '{name}'")))
    }
}

impl<D, E, R> NamedQueries<D> for DomainService<D, E, R>
where
    D: DomainModel,
    E: Entity + Default,
    R: TrackableRepository<E>,
{
}
