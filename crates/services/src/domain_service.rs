//! Domain service: a repository seen through a mapper.

use tessera_core::{DataError, DataResult, Entity, Key, KeyValue, Query, Tracking};
use tessera_infra::TrackableRepository;
use tessera_mapping::{DomainModel, Mapper, MapperConfiguration, PropertyPair};

/// Domain-model facade over a [`TrackableRepository`].
///
/// Every operation maps its inputs to entities, delegates, and maps results
/// back. The identity token travels with each projection, so a model
/// returned by `find` and later handed to `update` addresses the entity the
/// session already tracks.
pub struct DomainService<D, E, R> {
    repository: R,
    mapper: Mapper<D, E>,
}

impl<D, E, R: std::fmt::Debug> std::fmt::Debug for DomainService<D, E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainService")
            .field("repository", &self.repository)
            .field("mapper", &self.mapper)
            .finish()
    }
}

impl<D, E, R> DomainService<D, E, R>
where
    D: DomainModel,
    E: Entity + Default,
    R: TrackableRepository<E>,
{
    /// Fails with `Configuration` when `D ↔ E` is not registered.
    pub fn new(repository: R, configuration: &MapperConfiguration) -> DataResult<Self> {
        let mapper = configuration.mapper::<D, E>()?;
        tracing::debug!(set = E::SET.name, model = std::any::type_name::<D>(), "domain service created");
        Ok(Self { repository, mapper })
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn mapper(&self) -> &Mapper<D, E> {
        &self.mapper
    }

    pub async fn find<K: Into<Key> + Send>(&self, key: K) -> DataResult<D> {
        let entity = self.repository.find(key).await?;
        Ok(self.mapper.to_model(&entity))
    }

    pub async fn try_find<K: Into<Key> + Send>(&self, key: K) -> DataResult<Option<D>> {
        let entity = self.repository.try_find(key).await?;
        Ok(entity.map(|entity| self.mapper.to_model(&entity)))
    }

    pub async fn find_by<V: Into<KeyValue> + Send>(&self, key: V) -> DataResult<D> {
        let entity = self.repository.find_by(key).await?;
        Ok(self.mapper.to_model(&entity))
    }

    /// Track the model as a new entity.
    ///
    /// The model keeps its token, so later updates of the same value reach
    /// the added entity.
    pub fn insert(&self, model: &D) -> DataResult<()> {
        self.repository.insert(&self.mapper.to_entity(model))
    }

    /// Record the model's values. When the session tracks the entity behind
    /// the model, the mapped fields are merged into it so columns outside the
    /// mapping keep their tracked values.
    pub fn update(&self, model: &D) -> DataResult<()> {
        self.repository.update(&self.resolve(model)?)
    }

    /// Merge the model's mapped fields into an entity the caller already holds,
    /// keeping the target's tracking handle and navigation state.
    pub fn update_into(&self, model: &D, target: &mut E) -> DataResult<()> {
        self.mapper.merge_into(model, target);
        self.repository.update(target)
    }

    pub fn delete(&self, model: &D) -> DataResult<()> {
        self.repository.delete(&self.resolve(model)?)
    }

    pub async fn delete_by_key<K: Into<Key> + Send>(&self, key: K) -> DataResult<bool> {
        self.repository.delete_by_key(key).await
    }

    pub fn attach(&self, model: &D) -> DataResult<()> {
        self.repository.attach(&self.resolve(model)?)
    }

    pub fn detach(&self, model: &D) -> DataResult<()> {
        self.repository.detach(&self.resolve(model)?)
    }

    pub fn detach_entities(&self, models: &[D]) -> DataResult<()> {
        self.repository.detach_entities(&self.resolve_all(models)?)
    }

    /// Reconcile models edited outside a session, using the state each one
    /// reports through [`DomainModel::shipped_state`].
    pub fn apply_changes(&self, models: &[D]) -> DataResult<()> {
        let entities = models
            .iter()
            .map(|model| {
                let mut entity = self.resolve(model)?;
                // the tracked handle only changes once the whole batch validates
                *entity.tracking_mut() = Tracking::with_token(model.token());
                if let Some(state) = model.shipped_state() {
                    entity.tracking().mark(state);
                }
                Ok(entity)
            })
            .collect::<DataResult<Vec<E>>>()?;
        self.repository.apply_changes(&entities)
    }

    pub fn accept_changes(&self, models: &[D]) -> DataResult<()> {
        self.repository.accept_changes(&self.resolve_all(models)?)
    }

    /// Hydrate navigations of the entities behind `models`.
    ///
    /// The hydrated entities are not mapped back; use
    /// [`load_related_models`](Self::load_related_models) to receive them.
    pub async fn load_related_entities(&self, models: &[D]) -> DataResult<()> {
        let mut entities = self.resolve_all(models)?;
        self.repository.load_related_entities(&mut entities).await
    }

    /// Like [`load_related_entities`](Self::load_related_entities), returning
    /// the hydrated values as models.
    pub async fn load_related_models(&self, models: &[D]) -> DataResult<Vec<D>> {
        let mut entities = self.resolve_all(models)?;
        self.repository.load_related_entities(&mut entities).await?;
        Ok(self.mapper.to_models(&entities))
    }

    pub async fn exists<K: Into<Key> + Send>(&self, key: K) -> DataResult<bool> {
        self.repository.exists(key).await
    }

    pub async fn exists_by<V: Into<KeyValue> + Send>(&self, key: V) -> DataResult<bool> {
        self.repository.exists_by(key).await
    }

    /// Load one property from the store and write it into the model.
    pub async fn load_property<V>(&self, model: &mut D, pair: &PropertyPair<D, E, V>) -> DataResult<()>
    where
        V: serde::de::DeserializeOwned + Clone + Send + 'static,
    {
        let mut entity = self.resolve(model)?;
        self.repository.load_property(&mut entity, *pair.entity()).await?;
        let value = pair.entity().get(&entity).clone();
        pair.model().set(model, value);
        Ok(())
    }

    /// The entity behind `model`: the tracked one with the mapped fields merged
    /// in, or a fresh mapping when the session does not track the token.
    /// Columns outside the mapping never reach the tracker as defaults.
    fn resolve(&self, model: &D) -> DataResult<E> {
        match self.repository.tracked_entity(model.token())? {
            Some(mut entity) => {
                self.mapper.merge_into(model, &mut entity);
                Ok(entity)
            }
            None => Ok(self.mapper.to_entity(model)),
        }
    }

    fn resolve_all(&self, models: &[D]) -> DataResult<Vec<E>> {
        models.iter().map(|model| self.resolve(model)).collect()
    }

    /// Untracked, lazily evaluated query over all models.
    pub fn queryable(&self) -> Query<D> {
        self.mapper.project(self.repository.queryable())
    }

    pub fn query_by_sql(&self, sql: &str, params: &[KeyValue]) -> Query<D> {
        self.mapper.project(self.repository.query_by_sql(sql, params))
    }

    /// Object-query builder entry point; not offered by this layer. Use
    /// [`queryable`](Self::queryable) or a named query.
    pub fn query(&self) -> DataResult<Query<D>> {
        Err(DataError::unsupported(
            "query builder is not supported; use queryable() or a named query",
        ))
    }
}
