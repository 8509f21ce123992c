//! Resolved, bidirectional mapper for one domain/entity pair.

use std::sync::Arc;

use tessera_core::{Query, Trackable, Tracking};

use crate::model::DomainModel;

type CopyFn<S, T> = Box<dyn Fn(&S, &mut T) + Send + Sync>;

/// Registered field-copy functions for one pair.
pub(crate) struct TypeMap<D, E> {
    pub(crate) to_entity: CopyFn<D, E>,
    pub(crate) to_model: CopyFn<E, D>,
}

/// Projection between `D` and `E`.
///
/// Pure and side-effect free. Every projection carries the identity token
/// across, so `to_model(&to_entity(&d))` keeps `d`'s token.
pub struct Mapper<D, E> {
    map: Arc<TypeMap<D, E>>,
}

impl<D, E> Clone for Mapper<D, E> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl<D, E> core::fmt::Debug for Mapper<D, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapper")
            .field("model", &core::any::type_name::<D>())
            .field("entity", &core::any::type_name::<E>())
            .finish()
    }
}

impl<D, E> Mapper<D, E>
where
    D: DomainModel,
    E: Trackable + Default + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(map: Arc<TypeMap<D, E>>) -> Self {
        Self { map }
    }

    /// New entity value with a detached handle bound to the model's token.
    pub fn to_entity(&self, model: &D) -> E {
        let mut entity = E::default();
        *entity.tracking_mut() = Tracking::with_token(model.token());
        (self.map.to_entity)(model, &mut entity);
        entity
    }

    /// Field-level merge into an existing entity.
    ///
    /// The target keeps its tracking handle and every field the mapping does
    /// not cover (navigation state included).
    pub fn merge_into(&self, model: &D, target: &mut E) {
        (self.map.to_entity)(model, target);
    }

    pub fn to_model(&self, entity: &E) -> D {
        let mut model = D::default();
        (self.map.to_model)(entity, &mut model);
        model.set_token(entity.tracking().token());
        model
    }

    pub fn to_entities(&self, models: &[D]) -> Vec<E> {
        models.iter().map(|model| self.to_entity(model)).collect()
    }

    pub fn to_models(&self, entities: &[E]) -> Vec<D> {
        entities.iter().map(|entity| self.to_model(entity)).collect()
    }

    /// Query projection; composes a stage and never enumerates.
    pub fn project(&self, query: Query<E>) -> Query<D> {
        let mapper = self.clone();
        query.map(move |entity| mapper.to_model(&entity))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::MapperConfiguration;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_core::{DataResult, EntityToken, Row, RowSource, TrackingState};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Customer {
        pub customer_id: String,
        pub company_name: String,
        pub city: Option<String>,
        /// Not covered by the mapping.
        pub orders_loaded: bool,
        #[serde(skip)]
        pub tracking: Tracking,
    }

    impl Trackable for Customer {
        fn tracking(&self) -> &Tracking {
            &self.tracking
        }

        fn tracking_mut(&mut self) -> &mut Tracking {
            &mut self.tracking
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub(crate) struct CustomerModel {
        pub customer_id: String,
        pub company_name: String,
        pub city: Option<String>,
        pub token: EntityToken,
    }

    impl DomainModel for CustomerModel {
        fn token(&self) -> EntityToken {
            self.token
        }

        fn set_token(&mut self, token: EntityToken) {
            self.token = token;
        }
    }

    pub(crate) fn configuration() -> MapperConfiguration {
        MapperConfiguration::builder()
            .map::<CustomerModel, Customer>(
                |model, entity| {
                    entity.customer_id = model.customer_id.clone();
                    entity.company_name = model.company_name.clone();
                    entity.city = model.city.clone();
                },
                |entity, model| {
                    model.customer_id = entity.customer_id.clone();
                    model.company_name = entity.company_name.clone();
                    model.city = entity.city.clone();
                },
            )
            .build()
            .unwrap()
    }

    fn mapper() -> Mapper<CustomerModel, Customer> {
        configuration().mapper().unwrap()
    }

    #[test]
    fn to_entity_binds_the_model_token() {
        let model = CustomerModel {
            customer_id: "COMP1".into(),
            company_name: "Company 1".into(),
            ..Default::default()
        };

        let entity = mapper().to_entity(&model);

        assert_eq!(entity.customer_id, "COMP1");
        assert_eq!(entity.tracking.token(), model.token);
        assert_eq!(entity.tracking.state(), TrackingState::Detached);
    }

    #[test]
    fn merge_keeps_handle_and_unmapped_fields() {
        let mut target = Customer {
            customer_id: "BERGS".into(),
            company_name: "Berglunds snabbköp".into(),
            orders_loaded: true,
            ..Default::default()
        };
        let handle = target.tracking.clone();
        let model = CustomerModel {
            customer_id: "BERGS".into(),
            company_name: "Eastern Connection 1".into(),
            ..Default::default()
        };

        mapper().merge_into(&model, &mut target);

        assert_eq!(target.company_name, "Eastern Connection 1");
        assert!(target.orders_loaded);
        assert!(target.tracking.shares_cell_with(&handle));
    }

    #[test]
    fn list_forms_preserve_order() {
        let entities: Vec<Customer> = ["ALFKI", "ANATR", "ANTON"]
            .into_iter()
            .map(|id| Customer {
                customer_id: id.into(),
                ..Default::default()
            })
            .collect();

        let models = mapper().to_models(&entities);
        let ids: Vec<_> = models.iter().map(|m| m.customer_id.as_str()).collect();
        assert_eq!(ids, ["ALFKI", "ANATR", "ANTON"]);

        let back = mapper().to_entities(&models);
        assert_eq!(back, entities);
    }

    struct CountingSource(AtomicUsize);

    #[async_trait::async_trait]
    impl RowSource for CountingSource {
        async fn fetch(&self, _includes: &[String]) -> DataResult<Vec<Row>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let row = serde_json::json!({
                "customer_id": "ALFKI",
                "company_name": "Alfreds Futterkiste",
                "city": "Berlin",
                "orders_loaded": false
            });
            Ok(vec![row.as_object().cloned().unwrap_or_default()])
        }
    }

    #[tokio::test]
    async fn project_stays_lazy() {
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let entities: Query<Customer> = Query::new(source.clone(), |row| {
            Ok(serde_json::from_value(serde_json::Value::Object(row))?)
        });

        let models = mapper().project(entities);
        assert_eq!(source.0.load(Ordering::SeqCst), 0);

        let models = models.to_list().await.unwrap();
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        assert_eq!(models[0].company_name, "Alfreds Futterkiste");
        assert_eq!(models[0].city.as_deref(), Some("Berlin"));
    }

    proptest! {
        #[test]
        fn round_trip_is_lossless(
            customer_id in "[A-Z]{5}",
            company_name in "[A-Za-z][A-Za-z0-9 ]{0,39}",
            city in proptest::option::of("[A-Za-z ]{1,20}"),
        ) {
            let model = CustomerModel {
                customer_id,
                company_name,
                city,
                token: EntityToken::new(),
            };
            let mapper = mapper();

            let back = mapper.to_model(&mapper.to_entity(&model));

            prop_assert_eq!(back, model);
        }
    }
}
