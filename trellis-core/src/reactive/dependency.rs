//! Dependency Descriptors
//!
//! A dependency names one attribute a computed attribute reads: the model
//! that owns it and the attribute name. The owner is held weakly, so a
//! computed attribute never keeps a foreign model alive.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::model::{Model, ModelId, WeakModel};

/// A resolved `(owner, attribute)` pair.
///
/// Equality and hashing use the owner's identity, not its contents.
#[derive(Clone)]
pub struct Dependency {
    owner: WeakModel,
    attribute: String,
}

impl Dependency {
    pub fn new(owner: &Model, attribute: impl Into<String>) -> Self {
        Self {
            owner: owner.downgrade(),
            attribute: attribute.into(),
        }
    }

    pub fn owner_id(&self) -> ModelId {
        self.owner.id()
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// The owning model, if it is still alive.
    pub fn owner(&self) -> Option<Model> {
        self.owner.upgrade()
    }

    pub(crate) fn is(&self, owner: ModelId, attribute: &str) -> bool {
        self.owner.id() == owner && self.attribute == attribute
    }

    /// Current value of the attribute; `Null` once the owner is gone.
    pub(crate) fn read(&self) -> Value {
        self.owner()
            .map(|owner| owner.get(&self.attribute))
            .unwrap_or(Value::Null)
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.owner.id() == other.owner.id() && self.attribute == other.attribute
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.id().hash(state);
        self.attribute.hash(state);
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner.id(), self.attribute)
    }
}

/// A dependency as declared on a [`Computed`](super::Computed) definition.
///
/// Local names are resolved against the model the computed attribute is
/// added to.
#[derive(Clone)]
pub enum DependencySpec {
    /// An attribute of the owning model.
    Local(String),
    /// An attribute of another model.
    Foreign(WeakModel, String),
}

impl DependencySpec {
    pub fn foreign(model: &Model, attribute: impl Into<String>) -> Self {
        Self::Foreign(model.downgrade(), attribute.into())
    }

    pub(crate) fn resolve(&self, owner: &Model) -> Dependency {
        match self {
            Self::Local(attribute) => Dependency::new(owner, attribute.clone()),
            Self::Foreign(model, attribute) => Dependency {
                owner: model.clone(),
                attribute: attribute.clone(),
            },
        }
    }
}

impl From<&str> for DependencySpec {
    fn from(attribute: &str) -> Self {
        Self::Local(attribute.to_owned())
    }
}

impl From<String> for DependencySpec {
    fn from(attribute: String) -> Self {
        Self::Local(attribute)
    }
}

impl From<(&str, &Model)> for DependencySpec {
    fn from((attribute, model): (&str, &Model)) -> Self {
        Self::foreign(model, attribute)
    }
}

impl fmt::Debug for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(attribute) => write!(f, "{attribute}"),
            Self::Foreign(model, attribute) => write!(f, "{}.{}", model.id(), attribute),
        }
    }
}
