//! Typed property selectors.

use core::fmt;

/// Accessor handle for one property `V` of shape `T`.
///
/// Replaces selection-by-name: the value type is checked at compile time,
/// and the name is only used to address the property in the store.
pub struct Property<T, V> {
    name: &'static str,
    get: fn(&T) -> &V,
    set: fn(&mut T, V),
}

impl<T, V> Property<T, V> {
    pub fn new(name: &'static str, get: fn(&T) -> &V, set: fn(&mut T, V)) -> Self {
        Self { name, get, set }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get<'a>(&self, target: &'a T) -> &'a V {
        (self.get)(target)
    }

    pub fn set(&self, target: &mut T, value: V) {
        (self.set)(target, value)
    }
}

impl<T, V> Clone for Property<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Property<T, V> {}

impl<T, V> fmt::Debug for Property<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property").field("name", &self.name).finish()
    }
}

/// `property!(Customer, city)` builds a `Property<Customer, _>` for the field.
#[macro_export]
macro_rules! property {
    ($t:ty, $field:ident) => {
        $crate::Property::new(
            stringify!($field),
            |target: &$t| &target.$field,
            |target: &mut $t, value| target.$field = value,
        )
    };
}

#[cfg(test)]
mod tests {
    #[derive(Default)]
    struct Customer {
        city: Option<String>,
    }

    #[test]
    fn macro_builds_named_accessors() {
        let city = property!(Customer, city);
        let mut customer = Customer::default();

        city.set(&mut customer, Some("Warszawa".into()));

        assert_eq!(city.name(), "city");
        assert_eq!(city.get(&customer).as_deref(), Some("Warszawa"));
    }
}
