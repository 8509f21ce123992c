//! Change-tracking repository.
//!
//! A [`Repository`] is a typed view of one entity set inside a [`Session`].
//! Mutating operations only record intent in the session's tracker; nothing
//! reaches the store until the unit of work commits.
//!
//! Lookups by key resolve identity: an entity already tracked by the session
//! is returned from the tracker (sharing its tracking handle) instead of
//! being loaded again.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use tessera_core::{
    DataError, DataResult, Entity, EntityToken, Key, KeyValue, Navigation, NavigationKind, Property, Query,
    Row, RowSource, TrackingState,
};

use crate::session::Session;
use crate::store::DataStore;
use crate::tracker::{EntryInput, TrackedEntry};

/// Repository capability over one entity type.
#[async_trait::async_trait]
pub trait TrackableRepository<E: Entity>: Send + Sync {
    /// Entity with the given primary key; `NotFound` when absent.
    async fn find<K: Into<Key> + Send>(&self, key: K) -> DataResult<E>;

    /// Like [`find`](Self::find) but absence is `None`.
    async fn try_find<K: Into<Key> + Send>(&self, key: K) -> DataResult<Option<E>>;

    /// Single-key form of [`find`](Self::find).
    async fn find_by<V: Into<KeyValue> + Send>(&self, key: V) -> DataResult<E> {
        self.find(Key::from(key.into())).await
    }

    /// Entity tracked under an identity token, if any.
    fn tracked_entity(&self, token: EntityToken) -> DataResult<Option<E>>;

    /// Track a new entity as `Added`.
    fn insert(&self, entity: &E) -> DataResult<()>;

    /// Record the entity's current values; only changed properties are written.
    fn update(&self, entity: &E) -> DataResult<()>;

    /// Mark for removal. Deleting an entity that was only inserted in this
    /// session just forgets it.
    fn delete(&self, entity: &E) -> DataResult<()>;

    /// Load and mark for removal; `false` when no such entity exists.
    async fn delete_by_key<K: Into<Key> + Send>(&self, key: K) -> DataResult<bool>;

    /// Begin tracking as `Unchanged`.
    fn attach(&self, entity: &E) -> DataResult<()>;

    fn detach(&self, entity: &E) -> DataResult<()>;

    fn detach_entities(&self, entities: &[E]) -> DataResult<()>;

    /// Reconcile entities whose state was recorded outside the session.
    fn apply_changes(&self, entities: &[E]) -> DataResult<()>;

    /// Mark entities as persisted without writing anything.
    fn accept_changes(&self, entities: &[E]) -> DataResult<()>;

    /// Hydrate every navigation property of the given entities.
    async fn load_related_entities(&self, entities: &mut [E]) -> DataResult<()>;

    async fn exists<K: Into<Key> + Send>(&self, key: K) -> DataResult<bool>;

    async fn exists_by<V: Into<KeyValue> + Send>(&self, key: V) -> DataResult<bool> {
        self.exists(Key::from(key.into())).await
    }

    /// Load one property (scalar column or navigation) into the entity.
    async fn load_property<V>(&self, entity: &mut E, property: Property<E, V>) -> DataResult<()>
    where
        V: DeserializeOwned + Send + 'static;

    /// Untracked query over the whole set.
    fn queryable(&self) -> Query<E>;

    /// Untracked query seeded by backend-specific raw query text.
    fn query_by_sql(&self, sql: &str, params: &[KeyValue]) -> Query<E>;
}

/// Related value(s) of one navigation for the entity stored in `row`.
async fn load_navigation<S: DataStore + ?Sized>(
    store: &S,
    navigation: &Navigation,
    row: &Row,
) -> DataResult<JsonValue> {
    let empty = match navigation.kind {
        NavigationKind::Reference => JsonValue::Null,
        NavigationKind::Collection => JsonValue::Array(Vec::new()),
    };

    let mut filters = Vec::with_capacity(navigation.local.len());
    for (local, remote) in navigation.local.iter().zip(navigation.remote) {
        match row.get(*local).and_then(KeyValue::from_json) {
            Some(value) => filters.push((*remote, value)),
            None => return Ok(empty),
        }
    }

    let rows = store.select_where(navigation.target, &filters).await?;
    Ok(match navigation.kind {
        NavigationKind::Reference => rows
            .into_iter()
            .next()
            .map(JsonValue::Object)
            .unwrap_or(empty),
        NavigationKind::Collection => {
            JsonValue::Array(rows.into_iter().map(JsonValue::Object).collect())
        }
    })
}

/// Entity value of a tracker entry, sharing the entry's handle.
fn rebuild<E: Entity>(entry: &TrackedEntry) -> DataResult<E> {
    let mut entity = E::from_row(entry.current().clone())?;
    *entity.tracking_mut() = entry.tracking().clone();
    Ok(entity)
}

#[derive(Debug)]
enum Seed {
    All,
    Sql { sql: String, params: Vec<KeyValue> },
}

/// Row source behind repository queries.
struct EntitySource<S> {
    store: Arc<S>,
    set: &'static str,
    navigations: &'static [Navigation],
    seed: Seed,
}

#[async_trait::async_trait]
impl<S: DataStore + 'static> RowSource for EntitySource<S> {
    async fn fetch(&self, includes: &[String]) -> DataResult<Vec<Row>> {
        let resolved = includes
            .iter()
            .map(|name| {
                self.navigations
                    .iter()
                    .find(|navigation| navigation.name == name.as_str())
                    .ok_or_else(|| {
                        DataError::configuration(format!(
                            "{} has no navigation named '{name}'",
                            self.set
                        ))
                    })
            })
            .collect::<DataResult<Vec<_>>>()?;

        let mut rows = match &self.seed {
            Seed::All => self.store.select_where(self.set, &[]).await?,
            Seed::Sql { sql, params } => self.store.select_sql(sql, params).await?,
        };

        for row in rows.iter_mut() {
            for navigation in &resolved {
                let value = load_navigation(self.store.as_ref(), navigation, row).await?;
                row.insert(navigation.name.to_string(), value);
            }
        }
        tracing::debug!(set = self.set, rows = rows.len(), seed = ?self.seed, "query executed");
        Ok(rows)
    }
}

pub struct Repository<E, S> {
    session: Session<S>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S> Clone for Repository<E, S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E, S> std::fmt::Debug for Repository<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<E>())
            .field("session", &self.session)
            .finish()
    }
}

impl<E: Entity, S: DataStore + 'static> Repository<E, S> {
    pub fn new(session: Session<S>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Entity tracked under `key`, rebuilt from the tracker with its shared handle.
    fn tracked(&self, key: &Key) -> DataResult<Option<(TrackingState, E)>> {
        let tracker = self.session.tracker()?;
        let Some(entry) = tracker.by_key(&E::SET, key) else {
            return Ok(None);
        };
        Ok(Some((entry.state(), rebuild(entry)?)))
    }

    fn tracked_state(&self, key: &Key) -> DataResult<Option<TrackingState>> {
        Ok(self
            .session
            .tracker()?
            .by_key(&E::SET, key)
            .map(|entry| entry.state()))
    }

    fn inputs(entities: &[E]) -> DataResult<Vec<EntryInput>> {
        entities.iter().map(EntryInput::of).collect()
    }

    fn source(&self, seed: Seed) -> Query<E> {
        let source = EntitySource {
            store: Arc::clone(self.session.store()),
            set: E::SET.name,
            navigations: E::navigations(),
            seed,
        };
        Query::new(Arc::new(source), E::from_row)
    }
}

#[async_trait::async_trait]
impl<E: Entity, S: DataStore + 'static> TrackableRepository<E> for Repository<E, S> {
    async fn find<K: Into<Key> + Send>(&self, key: K) -> DataResult<E> {
        let key = key.into();
        self.try_find(key.clone())
            .await?
            .ok_or_else(|| DataError::not_found(format!("{} {key}", E::SET.name)))
    }

    async fn try_find<K: Into<Key> + Send>(&self, key: K) -> DataResult<Option<E>> {
        let key = key.into();
        if let Some((state, entity)) = self.tracked(&key)? {
            tracing::debug!(set = E::SET.name, key = %key, "identity resolved from tracker");
            return Ok((state != TrackingState::Deleted).then_some(entity));
        }

        let Some(row) = self.session.store().find(&E::SET, &key).await? else {
            return Ok(None);
        };
        let entity = E::from_row(row)?;

        // tracked meanwhile through another handle of this session
        if let Some((state, tracked)) = self.tracked(&key)? {
            return Ok((state != TrackingState::Deleted).then_some(tracked));
        }
        self.session.tracker()?.attach(EntryInput::of(&entity)?)?;
        Ok(Some(entity))
    }

    fn tracked_entity(&self, token: EntityToken) -> DataResult<Option<E>> {
        let tracker = self.session.tracker()?;
        let entity = tracker.get(token).map(rebuild::<E>).transpose()?;
        Ok(entity)
    }

    fn insert(&self, entity: &E) -> DataResult<()> {
        let input = EntryInput::of(entity)?;
        self.session.tracker()?.insert(input)
    }

    fn update(&self, entity: &E) -> DataResult<()> {
        let input = EntryInput::of(entity)?;
        self.session.tracker()?.update(input)
    }

    fn delete(&self, entity: &E) -> DataResult<()> {
        let input = EntryInput::of(entity)?;
        self.session.tracker()?.delete(input)
    }

    async fn delete_by_key<K: Into<Key> + Send>(&self, key: K) -> DataResult<bool> {
        match self.try_find(key).await? {
            Some(entity) => {
                self.delete(&entity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn attach(&self, entity: &E) -> DataResult<()> {
        let input = EntryInput::of(entity)?;
        self.session.tracker()?.attach(input)
    }

    fn detach(&self, entity: &E) -> DataResult<()> {
        self.session.tracker()?.detach(entity.tracking());
        Ok(())
    }

    fn detach_entities(&self, entities: &[E]) -> DataResult<()> {
        let mut tracker = self.session.tracker()?;
        for entity in entities {
            tracker.detach(entity.tracking());
        }
        Ok(())
    }

    fn apply_changes(&self, entities: &[E]) -> DataResult<()> {
        let inputs = Self::inputs(entities)?;
        self.session.tracker()?.apply(inputs)
    }

    fn accept_changes(&self, entities: &[E]) -> DataResult<()> {
        let inputs = Self::inputs(entities)?;
        self.session.tracker()?.accept(inputs);
        Ok(())
    }

    async fn load_related_entities(&self, entities: &mut [E]) -> DataResult<()> {
        let navigations = E::navigations();
        for entity in entities.iter_mut() {
            let row = entity.to_row()?;
            for navigation in navigations {
                let value = load_navigation(self.session.store().as_ref(), navigation, &row).await?;
                entity.set_property(navigation.name, value)?;
            }
        }
        Ok(())
    }

    async fn exists<K: Into<Key> + Send>(&self, key: K) -> DataResult<bool> {
        let key = key.into();
        if let Some(state) = self.tracked_state(&key)? {
            return Ok(state != TrackingState::Deleted);
        }
        Ok(self.session.store().exists(&E::SET, &key).await?)
    }

    async fn load_property<V>(&self, entity: &mut E, property: Property<E, V>) -> DataResult<()>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let name = property.name();
        let (value, scalar) = match E::navigation(name) {
            Some(navigation) => {
                let row = entity.to_row()?;
                let value = load_navigation(self.session.store().as_ref(), navigation, &row).await?;
                (value, false)
            }
            None => {
                let key = entity.key()?;
                let value = self
                    .session
                    .store()
                    .load_property(&E::SET, &key, name)
                    .await?
                    .ok_or_else(|| DataError::not_found(format!("{} {key}", E::SET.name)))?;
                (value, true)
            }
        };

        let typed: V = serde_json::from_value(value.clone())?;
        property.set(entity, typed);
        if scalar {
            self.session
                .tracker()?
                .refresh_property(entity.tracking().token(), name, &value);
        }
        Ok(())
    }

    fn queryable(&self) -> Query<E> {
        self.source(Seed::All)
    }

    fn query_by_sql(&self, sql: &str, params: &[KeyValue]) -> Query<E> {
        self.source(Seed::Sql {
            sql: sql.to_string(),
            params: params.to_vec(),
        })
    }
}
