//! Lazily evaluated, composable queries.
//!
//! A [`Query`] is a row source plus a chain of in-process stages (filter,
//! projection, ordering, paging). Composing stages never touches the store;
//! rows are fetched only by the terminal operations (`to_list`, `first`,
//! `count`, `any`). Queries are untracked: enumerated entities carry fresh,
//! detached tracking handles.

use std::fmt;
use std::sync::Arc;

use crate::entity::Row;
use crate::error::DataResult;

/// Store-facing seed of a query.
#[async_trait::async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch the seed rows, hydrating the named navigation properties.
    async fn fetch(&self, includes: &[String]) -> DataResult<Vec<Row>>;
}

type Pipeline<T> = Arc<dyn Fn(Vec<Row>) -> DataResult<Vec<T>> + Send + Sync>;

/// Composable query handle.
pub struct Query<T> {
    source: Arc<dyn RowSource>,
    includes: Vec<String>,
    pipeline: Pipeline<T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            includes: self.includes.clone(),
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("includes", &self.includes)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Query<T> {
    /// Seed a query; `materialize` turns one fetched row into an item.
    pub fn new(
        source: Arc<dyn RowSource>,
        materialize: impl Fn(Row) -> DataResult<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            includes: Vec::new(),
            pipeline: Arc::new(move |rows: Vec<Row>| -> DataResult<Vec<T>> {
                rows.into_iter().map(&materialize).collect()
            }),
        }
    }

    fn stage<U: 'static>(
        self,
        stage: impl Fn(Vec<T>) -> DataResult<Vec<U>> + Send + Sync + 'static,
    ) -> Query<U> {
        let previous = self.pipeline;
        Query {
            source: self.source,
            includes: self.includes,
            pipeline: Arc::new(move |rows: Vec<Row>| -> DataResult<Vec<U>> {
                stage(previous(rows)?)
            }),
        }
    }

    /// Hydrate a navigation property of the seed entity before the stages run.
    pub fn include(mut self, navigation: impl Into<String>) -> Self {
        let navigation = navigation.into();
        if !self.includes.contains(&navigation) {
            self.includes.push(navigation);
        }
        self
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn filter(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.stage(move |items| Ok(items.into_iter().filter(|item| predicate(item)).collect()))
    }

    pub fn map<U: Send + 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Query<U> {
        self.stage(move |items| Ok(items.into_iter().map(&f).collect()))
    }

    pub fn try_map<U: Send + 'static>(
        self,
        f: impl Fn(T) -> DataResult<U> + Send + Sync + 'static,
    ) -> Query<U> {
        self.stage(move |items| items.into_iter().map(&f).collect())
    }

    /// Stable ascending sort.
    pub fn order_by<K: Ord + 'static>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.stage(move |mut items| {
            items.sort_by_key(|item| key(item));
            Ok(items)
        })
    }

    /// Stable descending sort.
    pub fn order_by_desc<K: Ord + 'static>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.stage(move |mut items| {
            items.sort_by_key(|item| std::cmp::Reverse(key(item)));
            Ok(items)
        })
    }

    pub fn skip(self, count: usize) -> Self {
        self.stage(move |items| Ok(items.into_iter().skip(count).collect()))
    }

    pub fn take(self, count: usize) -> Self {
        self.stage(move |items| Ok(items.into_iter().take(count).collect()))
    }

    /// Zero-based page of `size` items.
    pub fn page(self, index: usize, size: usize) -> Self {
        self.skip(index.saturating_mul(size)).take(size)
    }

    pub async fn to_list(&self) -> DataResult<Vec<T>> {
        let rows = self.source.fetch(&self.includes).await?;
        (self.pipeline)(rows)
    }

    pub async fn first(&self) -> DataResult<Option<T>> {
        Ok(self.to_list().await?.into_iter().next())
    }

    pub async fn count(&self) -> DataResult<usize> {
        Ok(self.to_list().await?.len())
    }

    pub async fn any(&self) -> DataResult<bool> {
        Ok(self.count().await? > 0)
    }
}
