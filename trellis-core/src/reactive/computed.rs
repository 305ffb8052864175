//! Computed Attributes
//!
//! A computed attribute is a cached derived value owned by a model. It is
//! read and written through the same `get`/`set` calls as stored attributes.
//!
//! # How Computed Attributes Work
//!
//! 1. A new computed attribute starts `Dirty`.
//!
//! 2. On `get`, a dirty attribute evaluates its getter and caches the result.
//!    In auto mode the getter runs inside a tracking frame and the attributes
//!    it read become its bindings. In manual mode the declared dependencies
//!    are used verbatim and were bound once at registration.
//!
//! 3. While `Clean`, `get` returns the cache without calling the getter.
//!
//! 4. When a bound dependency changes, the attribute goes back to `Dirty` and
//!    emits `change:<name>` on its model. It does not re-evaluate until the
//!    next `get`.
//!
//! 5. On `set`, the setter maps the proposed value to writes on other
//!    attributes. Without a setter the attribute is read-only.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::binding::Bindings;
use super::context::{track, untracked};
use super::dependency::{Dependency, DependencySpec};
use super::write::PropagationGuard;
use crate::error::{ModelError, Result};
use crate::model::Model;

/// Underlying writes produced by a setter, in resolution order.
pub type Writes = IndexMap<String, Value>;

/// Getter function.
///
/// Receives the owning model and, in manual mode, the current values of the
/// declared dependencies in declaration order. Auto-mode getters receive an
/// empty slice and read what they need through `Model::get`.
pub type Getter = Rc<dyn Fn(&Model, &[Value]) -> Value>;

/// Setter function. Returns the writes to perform, or `None` for a no-op.
pub type Setter = Rc<dyn Fn(&Model, Value) -> Option<Writes>>;

/// Cache validity of a computed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cache must be rebuilt on the next read.
    Dirty,

    /// The getter is running.
    Evaluating,

    /// The cached value is up-to-date.
    Clean,
}

/// How the dependency set is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Discovered by tracking each evaluation.
    Auto,

    /// Declared up front and never rediscovered.
    Manual,
}

/// Definition of a computed attribute, passed to `Model::add_computed`.
///
/// ```rust,ignore
/// // Read-only, dependencies discovered automatically.
/// Computed::new(|m, _| json!(m.get("price").as_f64().unwrap_or(0.0) * 1.2));
///
/// // Read/write with declared dependencies.
/// Computed::new(|_, deps| if deps[2] == json!(true) { deps[1].clone() } else { deps[0].clone() })
///     .deps(["firstName", "lastName", "isSelected"])
///     .setter(|_, value| Some(Writes::from([("firstName".to_owned(), value)])));
/// ```
#[derive(Clone)]
pub struct Computed {
    getter: Getter,
    setter: Option<Setter>,
    deps: Option<Vec<DependencySpec>>,
}

impl Computed {
    /// A read-only computed attribute in auto mode.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(&Model, &[Value]) -> Value + 'static,
    {
        Self {
            getter: Rc::new(getter),
            setter: None,
            deps: None,
        }
    }

    /// Make the attribute writable.
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Model, Value) -> Option<Writes> + 'static,
    {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Declare dependencies, switching to manual mode.
    pub fn deps<I, D>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DependencySpec>,
    {
        self.deps = Some(deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn mode(&self) -> DependencyMode {
        if self.deps.is_some() {
            DependencyMode::Manual
        } else {
            DependencyMode::Auto
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("mode", &self.mode())
            .field("read_only", &self.is_read_only())
            .field("deps", &self.deps)
            .finish()
    }
}

/// A computed attribute registered on a model.
pub(crate) struct ComputedAttribute {
    name: String,
    getter: Getter,
    setter: Option<Setter>,
    mode: DependencyMode,
    /// Declared dependencies (manual mode only).
    declared: Vec<Dependency>,
    state: Cell<ComputedState>,
    /// Set when a dependency changes while the getter is running.
    stale: Cell<bool>,
    value: RefCell<Value>,
    bindings: RefCell<Bindings>,
}

impl ComputedAttribute {
    pub fn new(name: String, definition: Computed, owner: &Model) -> Rc<Self> {
        let mode = definition.mode();
        let declared = definition
            .deps
            .unwrap_or_default()
            .iter()
            .map(|spec| spec.resolve(owner))
            .collect();

        Rc::new(Self {
            name,
            getter: definition.getter,
            setter: definition.setter,
            mode,
            declared,
            state: Cell::new(ComputedState::Dirty),
            stale: Cell::new(false),
            value: RefCell::new(Value::Null),
            bindings: RefCell::new(Bindings::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ComputedState {
        self.state.get()
    }

    pub fn mode(&self) -> DependencyMode {
        self.mode
    }

    /// Whether this attribute has never discovered its dependencies.
    ///
    /// Such an attribute cannot be invalidated, so a listener that has not
    /// read it yet would never hear about changes.
    pub fn awaits_discovery(&self) -> bool {
        self.mode == DependencyMode::Auto
            && self.state.get() == ComputedState::Dirty
            && self.bindings.borrow().len() == 0
    }

    /// Currently bound dependencies.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.bindings.borrow().dependencies().cloned().collect()
    }

    /// Bind the declared dependencies. Manual mode binds exactly once.
    pub fn bind_declared(self: &Rc<Self>, owner: &Model) {
        let mut bindings = self.bindings.borrow_mut();
        for dependency in &self.declared {
            bindings.bind(dependency.clone(), owner, self);
        }
    }

    /// Read the value, evaluating the getter if the cache is dirty.
    pub fn value(self: &Rc<Self>, owner: &Model) -> Value {
        match self.state.get() {
            ComputedState::Clean => return self.value.borrow().clone(),
            ComputedState::Evaluating => {
                warn!(
                    attribute = %self.name,
                    "computed attribute read during its own evaluation"
                );
                return self.value.borrow().clone();
            }
            ComputedState::Dirty => {}
        }

        let evaluation = Evaluation::begin(&self.state, &self.stale);

        let (value, discovered) = match self.mode {
            DependencyMode::Auto => {
                let tracked = track(|| (self.getter)(owner, &[]));
                let discovered: IndexSet<Dependency> = tracked
                    .dependencies
                    .into_iter()
                    .filter(|dependency| !dependency.is(owner.id(), &self.name))
                    .collect();
                (tracked.result, Some(discovered))
            }
            DependencyMode::Manual => {
                let value = untracked(|| {
                    let args: SmallVec<[Value; 4]> =
                        self.declared.iter().map(Dependency::read).collect();
                    (self.getter)(owner, &args)
                });
                (value, None)
            }
        };

        *self.value.borrow_mut() = value.clone();
        evaluation.finish();

        if let Some(discovered) = discovered {
            self.bindings
                .borrow_mut()
                .reconcile(&discovered, owner, self);
        }

        debug!(
            attribute = %self.name,
            mode = ?self.mode,
            dependencies = self.bindings.borrow().len(),
            "evaluated computed attribute"
        );

        value
    }

    /// Translate a write into underlying writes.
    pub fn write(&self, owner: &Model, value: Value) -> Result<Writes> {
        let setter = self
            .setter
            .as_ref()
            .ok_or_else(|| ModelError::ReadOnly(self.name.clone()))?;
        Ok(setter(owner, value).unwrap_or_default())
    }

    /// Mark dirty and announce the change on the owning model.
    ///
    /// Propagation through a cycle of computed attributes stops at the first
    /// attribute whose notification is already in flight and which was not
    /// clean. An attribute that was re-read and then invalidated again while
    /// its own notification is being delivered gets one more delivery once
    /// the current one ends.
    pub fn invalidate(&self, owner: &Model) {
        let was_clean = match self.state.get() {
            ComputedState::Clean => {
                self.state.set(ComputedState::Dirty);
                true
            }
            ComputedState::Evaluating => {
                self.stale.set(true);
                false
            }
            ComputedState::Dirty => false,
        };

        let Some(guard) = PropagationGuard::enter(owner.id(), &self.name) else {
            if was_clean {
                trace!(attribute = %self.name, "invalidated during delivery, redelivering");
                PropagationGuard::request_redelivery(owner.id(), &self.name);
            } else {
                trace!(attribute = %self.name, "notification already in flight");
            }
            return;
        };

        loop {
            owner.emit_change(&self.name, None);
            if !guard.take_redelivery() {
                break;
            }
        }
    }

    /// Drop every binding and forget the cache.
    pub fn release(&self) {
        self.bindings.borrow_mut().release();
        self.state.set(ComputedState::Dirty);
        self.stale.set(false);
        *self.value.borrow_mut() = Value::Null;
    }
}

impl fmt::Debug for ComputedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedAttribute")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("state", &self.state.get())
            .field("read_only", &self.setter.is_none())
            .field("bindings", &self.bindings.borrow().len())
            .finish()
    }
}

/// Marks an evaluation in progress.
///
/// If the getter unwinds, or a dependency changed while it ran, the state
/// falls back to `Dirty` so the next read tries again.
struct Evaluation<'a> {
    state: &'a Cell<ComputedState>,
    stale: &'a Cell<bool>,
    finished: bool,
}

impl<'a> Evaluation<'a> {
    fn begin(state: &'a Cell<ComputedState>, stale: &'a Cell<bool>) -> Self {
        state.set(ComputedState::Evaluating);
        stale.set(false);
        Self {
            state,
            stale,
            finished: false,
        }
    }

    fn finish(mut self) {
        if self.stale.replace(false) {
            self.state.set(ComputedState::Dirty);
        } else {
            self.state.set(ComputedState::Clean);
        }
        self.finished = true;
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.set(ComputedState::Dirty);
            self.stale.set(false);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
