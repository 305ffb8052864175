//! Attribute Store
//!
//! An ordered name → value map with change detection. A model owns two of
//! these: one for stored attributes and one for virtual attributes. Both
//! behave identically; only the stored one ends up in a snapshot.

use indexmap::IndexMap;
use serde_json::Value;

/// Raw attribute storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    values: IndexMap<String, Value>,
}

impl AttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value. Unknown names return `None` rather than failing.
    pub fn raw_get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Write a value, returning whether it differs from the previous one.
    ///
    /// An absent name counts as different from every value, including `Null`.
    pub fn raw_set(&mut self, name: &str, value: Value) -> bool {
        match self.values.get_mut(name) {
            Some(current) if *current == value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.values.insert(name.to_owned(), value);
                true
            }
        }
    }

    /// Check whether a name has ever been written.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Remove every value.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate names in first-write order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub(crate) fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }
}

impl From<IndexMap<String, Value>> for AttributeStore {
    fn from(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }
}
