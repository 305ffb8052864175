//! Models
//!
//! A `Model` is an observable attribute object with three kinds of
//! attributes sharing one namespace:
//!
//! - **stored** attributes, which are persisted in snapshots,
//! - **virtual** attributes, which behave identically but are never persisted,
//! - **computed** attributes, derived from other attributes by a getter and
//!   optionally written back through a setter.
//!
//! `get`, `set`, and `change:<name>` events work the same for all three.
//!
//! # Handles
//!
//! `Model` is a cheap, clonable handle to shared state. Clones refer to the
//! same model. Computed attributes that read other models hold them through
//! `WeakModel`, so a dependency never keeps a model alive.
//!
//! # Example
//!
//! ```rust,ignore
//! let person = Model::with_attributes([
//!     ("firstName", json!("Charlie")),
//!     ("lastName", json!("Brown")),
//! ]);
//!
//! person.add_computed("fullName", Computed::new(|m, _| {
//!     json!(format!("{} {}", m.get("firstName").as_str().unwrap_or(""),
//!                            m.get("lastName").as_str().unwrap_or("")))
//! }))?;
//!
//! assert_eq!(person.get("fullName"), json!("Charlie Brown"));
//! ```

mod events;
mod snapshot;
mod store;

pub use events::{change_event, Callback, ChangeEvent, ListenerId, CHANGE_PREFIX};
pub use snapshot::Snapshot;
pub use store::AttributeStore;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::reactive::{self, Computed, ComputedAttribute, ComputedState, Dependency, DependencyMode, TrackingContext, Writes};
use events::Listeners;

/// Unique identifier for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

struct ModelInner {
    id: ModelId,
    attributes: RefCell<AttributeStore>,
    virtuals: RefCell<AttributeStore>,
    computeds: RefCell<IndexMap<String, Rc<ComputedAttribute>>>,
    listeners: RefCell<Listeners>,
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        // Local bindings die with the listener table; foreign ones must be
        // removed from models that outlive this one.
        for computed in self.computeds.get_mut().values() {
            computed.release();
        }
    }
}

/// Handle to an observable model.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

/// Non-owning handle to a model.
#[derive(Clone)]
pub struct WeakModel {
    id: ModelId,
    inner: Weak<ModelInner>,
}

impl WeakModel {
    /// Get the model's unique ID.
    pub fn id(&self) -> ModelId {
        self.id
    }

    /// Get a strong handle, if the model is still alive.
    pub fn upgrade(&self) -> Option<Model> {
        self.inner.upgrade().map(|inner| Model { inner })
    }
}

impl fmt::Debug for WeakModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakModel({})", self.id)
    }
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::from_stores(AttributeStore::new(), AttributeStore::new())
    }

    /// Create a model with initial stored attributes.
    pub fn with_attributes<I, K>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values: IndexMap<String, Value> = attributes
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        Self::from_stores(values.into(), AttributeStore::new())
    }

    /// Create a model from a declarative configuration.
    pub fn from_config(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_stores(config.defaults.into(), config.virtuals.into()))
    }

    fn from_stores(attributes: AttributeStore, virtuals: AttributeStore) -> Self {
        Self {
            inner: Rc::new(ModelInner {
                id: ModelId::new(),
                attributes: RefCell::new(attributes),
                virtuals: RefCell::new(virtuals),
                computeds: RefCell::new(IndexMap::new()),
                listeners: RefCell::new(Listeners::default()),
            }),
        }
    }

    /// Get the model's unique ID.
    pub fn id(&self) -> ModelId {
        self.inner.id
    }

    /// Create a non-owning handle to this model.
    pub fn downgrade(&self) -> WeakModel {
        WeakModel {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Read any attribute: computed, virtual, or stored.
    ///
    /// Unknown names read as `Null`. Inside a computed getter the read is
    /// recorded as a dependency.
    pub fn get(&self, name: &str) -> Value {
        TrackingContext::record(self, name);

        if let Some(computed) = self.computed(name) {
            return computed.value(self);
        }
        if let Some(value) = self.inner.virtuals.borrow().raw_get(name) {
            return value.clone();
        }
        self.inner
            .attributes
            .borrow()
            .raw_get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Check whether a name is known in any namespace.
    pub fn has(&self, name: &str) -> bool {
        self.is_computed(name)
            || self.inner.virtuals.borrow().contains(name)
            || self.inner.attributes.borrow().contains(name)
    }

    /// Check whether a name is virtual or computed rather than stored.
    pub fn has_virtual(&self, name: &str) -> bool {
        self.is_computed(name) || self.inner.virtuals.borrow().contains(name)
    }

    /// Check whether a name is a computed attribute.
    pub fn is_computed(&self, name: &str) -> bool {
        self.inner.computeds.borrow().contains_key(name)
    }

    /// Cache state of a computed attribute.
    pub fn computed_state(&self, name: &str) -> Option<ComputedState> {
        self.computed(name).map(|computed| computed.state())
    }

    /// Dependency mode of a computed attribute.
    pub fn dependency_mode(&self, name: &str) -> Option<DependencyMode> {
        self.computed(name).map(|computed| computed.mode())
    }

    /// Dependencies a computed attribute is currently bound to.
    pub fn dependencies(&self, name: &str) -> Vec<Dependency> {
        self.computed(name)
            .map(|computed| computed.dependencies())
            .unwrap_or_default()
    }

    /// The stored attributes. Virtual and computed values are excluded.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from(self.inner.attributes.borrow().values().clone())
    }

    pub(crate) fn computed(&self, name: &str) -> Option<Rc<ComputedAttribute>> {
        self.inner.computeds.borrow().get(name).cloned()
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Write one attribute.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.set_many([(name, value.into())])
    }

    /// Write several attributes as one batch.
    ///
    /// Every target is resolved first; computed targets expand through their
    /// setters. If resolution fails nothing from this batch is committed.
    /// Otherwise all values are committed, then each changed attribute emits
    /// one `change:<name>` event with its final value, in the order the
    /// attributes were first touched.
    pub fn set_many<I, K, V>(&self, writes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut resolved = Writes::new();
        for (name, value) in writes {
            reactive::resolve(self, name.into(), value.into(), &mut resolved)?;
        }
        self.commit(resolved);
        Ok(())
    }

    fn commit(&self, writes: Writes) {
        let mut changed: SmallVec<[(String, Value); 4]> = SmallVec::new();

        for (name, value) in writes {
            let is_virtual = self.inner.virtuals.borrow().contains(&name);
            let store = if is_virtual {
                &self.inner.virtuals
            } else {
                &self.inner.attributes
            };
            if store.borrow_mut().raw_set(&name, value.clone()) {
                changed.push((name, value));
            }
        }

        for (name, value) in &changed {
            self.emit_change(name, Some(value));
        }
    }

    /// Set one key of an object-valued attribute; `None` removes the key.
    ///
    /// The object is copied, modified, and written back through `set`.
    /// Attributes that do not hold an object are left alone.
    pub fn modify_object(&self, name: &str, key: &str, value: Option<Value>) -> Result<()> {
        let Value::Object(mut object) = reactive::untracked(|| self.get(name)) else {
            return Ok(());
        };
        match value {
            Some(value) => {
                object.insert(key.to_owned(), value);
            }
            None => {
                object.remove(key);
            }
        }
        self.set(name, Value::Object(object))
    }

    /// Mutate a copy of an array-valued attribute and write it back.
    ///
    /// Attributes that do not hold an array are left alone.
    pub fn modify_array<F>(&self, name: &str, modify: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Value>),
    {
        let Value::Array(mut items) = reactive::untracked(|| self.get(name)) else {
            return Ok(());
        };
        modify(&mut items);
        self.set(name, Value::Array(items))
    }

    // ------------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------------

    /// Register a virtual attribute with a default value.
    pub fn add_virtual(&self, name: impl Into<String>, default: Value) -> Result<()> {
        let name = name.into();
        self.ensure_undefined(&name)?;
        self.inner.virtuals.borrow_mut().raw_set(&name, default);
        Ok(())
    }

    /// Register a computed attribute.
    ///
    /// Manual-mode attributes bind their declared dependencies immediately.
    /// Auto-mode attributes bind on first evaluation, which happens on the
    /// first read or when `change:<name>` already has listeners.
    pub fn add_computed(&self, name: impl Into<String>, definition: Computed) -> Result<()> {
        let name = name.into();
        self.ensure_undefined(&name)?;

        let computed = ComputedAttribute::new(name.clone(), definition, self);
        if computed.mode() == DependencyMode::Manual {
            computed.bind_declared(self);
        }

        debug!(model = %self.id(), attribute = %name, mode = ?computed.mode(), "added computed attribute");
        self.inner.computeds.borrow_mut().insert(name.clone(), computed);

        if self.listener_count(&change_event(&name)) > 0 {
            self.discover(&name);
        }
        Ok(())
    }

    /// Evaluate an auto-mode computed attribute that has not bound anything
    /// yet, so its listeners hear about changes before anyone reads it.
    fn discover(&self, name: &str) {
        let Some(computed) = self.computed(name) else {
            return;
        };
        if computed.awaits_discovery() {
            trace!(model = %self.id(), attribute = name, "discovering dependencies for listener");
            reactive::untracked(|| computed.value(self));
        }
    }

    fn ensure_undefined(&self, name: &str) -> Result<()> {
        if self.inner.attributes.borrow().contains(name) {
            return Err(ModelError::duplicate(name, "stored"));
        }
        if self.inner.virtuals.borrow().contains(name) {
            return Err(ModelError::duplicate(name, "virtual"));
        }
        if self.is_computed(name) {
            return Err(ModelError::duplicate(name, "computed"));
        }
        Ok(())
    }

    /// Remove every virtual and computed attribute.
    ///
    /// All bindings held by this model's computed attributes are released,
    /// on this model and on foreign models. Calling it again is a no-op.
    pub fn clear_virtuals(&self) {
        let computeds = std::mem::take(&mut *self.inner.computeds.borrow_mut());
        for computed in computeds.values() {
            computed.release();
        }
        self.inner.virtuals.borrow_mut().clear();

        debug!(model = %self.id(), computeds = computeds.len(), "cleared virtual attributes");
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Listen for an event by name, e.g. `"change:fullName"`.
    ///
    /// Listening to a computed attribute that was never read evaluates it
    /// once, so that it is bound to its dependencies.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<'_>) + 'static,
    {
        let listener = self
            .inner
            .listeners
            .borrow_mut()
            .add(event, Rc::new(callback));

        if let Some(attribute) = event.strip_prefix(CHANGE_PREFIX) {
            self.discover(attribute);
        }
        listener
    }

    /// Listen for changes of one attribute.
    pub fn on_change<F>(&self, attribute: &str, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<'_>) + 'static,
    {
        self.on(&change_event(attribute), callback)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, listener: ListenerId) -> bool {
        self.inner.listeners.borrow_mut().remove(listener)
    }

    /// Number of listeners registered for an event.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.borrow().count(event)
    }

    /// Emit `change:<attribute>`.
    ///
    /// Callbacks are copied out first, so listeners may read, write, or
    /// (un)subscribe while being notified.
    pub(crate) fn emit_change(&self, attribute: &str, committed: Option<&Value>) {
        let callbacks = self
            .inner
            .listeners
            .borrow()
            .callbacks(&change_event(attribute));
        trace!(model = %self.id(), attribute, listeners = callbacks.len(), "change");

        let event = ChangeEvent::new(self, attribute, committed);
        for callback in callbacks {
            callback(&event);
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.inner.id)
            .field("attributes", &*self.inner.attributes.borrow())
            .field("virtuals", &*self.inner.virtuals.borrow())
            .field(
                "computeds",
                &self.inner.computeds.borrow().keys().collect::<Vec<_>>(),
            )
            .field("listeners", &self.inner.listeners.borrow().total())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
