//! Mapping configuration, built once and shared by reference.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use tessera_core::{DataError, DataResult, Trackable};

use crate::mapper::{Mapper, TypeMap};
use crate::model::DomainModel;

type Registration = Arc<dyn Any + Send + Sync>;

/// Builder collecting one pair of field-copy functions per type pair.
#[derive(Default)]
pub struct MapperConfigurationBuilder {
    maps: HashMap<(TypeId, TypeId), Registration>,
    duplicates: Vec<String>,
}

impl MapperConfigurationBuilder {
    /// Register `D ↔ E`.
    ///
    /// `to_entity` copies every mapped field of the model into an entity,
    /// `to_model` copies the other way. Tracking metadata is handled by the
    /// mapper and must not be touched here.
    pub fn map<D, E>(
        mut self,
        to_entity: impl Fn(&D, &mut E) + Send + Sync + 'static,
        to_model: impl Fn(&E, &mut D) + Send + Sync + 'static,
    ) -> Self
    where
        D: DomainModel,
        E: Trackable + Default + Clone + Send + Sync + 'static,
    {
        let map: TypeMap<D, E> = TypeMap {
            to_entity: Box::new(to_entity),
            to_model: Box::new(to_model),
        };
        let key = (TypeId::of::<D>(), TypeId::of::<E>());
        if self.maps.insert(key, Arc::new(map)).is_some() {
            self.duplicates.push(pair_name::<D, E>());
        }
        self
    }

    pub fn build(self) -> DataResult<MapperConfiguration> {
        if !self.duplicates.is_empty() {
            return Err(DataError::configuration(format!(
                "mapping registered more than once: {}",
                self.duplicates.join(", ")
            )));
        }

        tracing::debug!(pairs = self.maps.len(), "mapper configuration built");
        Ok(MapperConfiguration {
            maps: Arc::new(self.maps),
        })
    }
}

/// Immutable mapping configuration.
#[derive(Clone)]
pub struct MapperConfiguration {
    maps: Arc<HashMap<(TypeId, TypeId), Registration>>,
}

impl core::fmt::Debug for MapperConfiguration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MapperConfiguration")
            .field("pairs", &self.maps.len())
            .finish()
    }
}

impl MapperConfiguration {
    pub fn builder() -> MapperConfigurationBuilder {
        MapperConfigurationBuilder::default()
    }

    pub fn is_registered<D: 'static, E: 'static>(&self) -> bool {
        self.maps.contains_key(&(TypeId::of::<D>(), TypeId::of::<E>()))
    }

    /// Resolve the mapper for `D ↔ E`; fails with `Configuration` when the
    /// pair was never registered.
    pub fn mapper<D, E>(&self) -> DataResult<Mapper<D, E>>
    where
        D: DomainModel,
        E: Trackable + Default + Clone + Send + Sync + 'static,
    {
        let registration = self
            .maps
            .get(&(TypeId::of::<D>(), TypeId::of::<E>()))
            .cloned()
            .ok_or_else(|| {
                DataError::configuration(format!("no mapping registered for {}", pair_name::<D, E>()))
            })?;

        let map = registration.downcast::<TypeMap<D, E>>().map_err(|_| {
            DataError::configuration(format!("mapping for {} has the wrong shape", pair_name::<D, E>()))
        })?;

        Ok(Mapper::new(map))
    }
}

fn pair_name<D, E>() -> String {
    format!("{} <-> {}", type_name::<D>(), type_name::<E>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::{Customer, CustomerModel, configuration};
    use tessera_core::{EntityToken, ErrorKind, Tracking};

    #[derive(Debug, Clone, Default)]
    struct Region {
        tracking: Tracking,
    }

    impl Trackable for Region {
        fn tracking(&self) -> &Tracking {
            &self.tracking
        }

        fn tracking_mut(&mut self) -> &mut Tracking {
            &mut self.tracking
        }
    }

    #[derive(Debug, Clone, Default)]
    struct RegionModel {
        token: EntityToken,
    }

    impl DomainModel for RegionModel {
        fn token(&self) -> EntityToken {
            self.token
        }

        fn set_token(&mut self, token: EntityToken) {
            self.token = token;
        }
    }

    #[test]
    fn unregistered_pair_is_a_configuration_error() {
        let err = configuration().mapper::<RegionModel, Region>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("RegionModel"));
    }

    #[test]
    fn reversed_pair_is_not_registered() {
        let configuration = configuration();
        assert!(configuration.is_registered::<CustomerModel, Customer>());
        assert!(!configuration.is_registered::<Customer, CustomerModel>());
    }

    #[test]
    fn duplicate_registration_fails_at_build() {
        let err = MapperConfiguration::builder()
            .map::<RegionModel, Region>(|_, _| {}, |_, _| {})
            .map::<RegionModel, Region>(|_, _| {}, |_, _| {})
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
