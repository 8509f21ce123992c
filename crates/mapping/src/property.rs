//! Property selectors spanning both shapes.

use core::fmt;

use tessera_core::Property;

/// A domain-model property and the entity property it maps to.
///
/// Both handles select a value of the same type `V`, so a pair that compiles
/// cannot fail to translate at run time.
pub struct PropertyPair<D, E, V> {
    model: Property<D, V>,
    entity: Property<E, V>,
}

impl<D, E, V> PropertyPair<D, E, V> {
    pub fn new(model: Property<D, V>, entity: Property<E, V>) -> Self {
        Self { model, entity }
    }

    pub fn model(&self) -> &Property<D, V> {
        &self.model
    }

    pub fn entity(&self) -> &Property<E, V> {
        &self.entity
    }
}

impl<D, E, V> Clone for PropertyPair<D, E, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D, E, V> Copy for PropertyPair<D, E, V> {}

impl<D, E, V> fmt::Debug for PropertyPair<D, E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyPair")
            .field("model", &self.model.name())
            .field("entity", &self.entity.name())
            .finish()
    }
}
