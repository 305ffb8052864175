//! Binding Registrar
//!
//! Connects a computed attribute to the change events of its dependencies.
//! Each binding is an ordinary `change:<attribute>` listener on the
//! dependency's owner; when it fires, the computed attribute is marked dirty
//! and announces its own change.
//!
//! Listeners capture only weak references to the computed attribute and its
//! model, so neither the owner nor a foreign model can keep the other alive.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::computed::ComputedAttribute;
use super::dependency::Dependency;
use crate::model::{ListenerId, Model};

/// The listeners one computed attribute currently holds.
#[derive(Debug, Default)]
pub(crate) struct Bindings {
    bound: IndexMap<Dependency, ListenerId>,
}

impl Bindings {
    /// Bind `dependency` unless it is already bound.
    ///
    /// A dependency whose owner has been dropped cannot fire and is skipped.
    pub fn bind(&mut self, dependency: Dependency, owner: &Model, computed: &Rc<ComputedAttribute>) {
        if self.bound.contains_key(&dependency) {
            return;
        }
        let Some(target) = dependency.owner() else {
            return;
        };

        let weak_owner = owner.downgrade();
        let weak_computed = Rc::downgrade(computed);
        let listener = target.on_change(dependency.attribute(), move |_| {
            if let (Some(owner), Some(computed)) = (weak_owner.upgrade(), weak_computed.upgrade()) {
                computed.invalidate(&owner);
            }
        });

        debug!(
            attribute = computed.name(),
            dependency = ?dependency,
            "bound dependency"
        );
        self.bound.insert(dependency, listener);
    }

    /// Make the bound set equal to `next`.
    ///
    /// Stale bindings are removed first, then new ones are added in
    /// discovery order.
    pub fn reconcile(
        &mut self,
        next: &IndexSet<Dependency>,
        owner: &Model,
        computed: &Rc<ComputedAttribute>,
    ) {
        let stale: Vec<Dependency> = self
            .bound
            .keys()
            .filter(|dependency| !next.contains(*dependency))
            .cloned()
            .collect();

        for dependency in stale {
            if let Some(listener) = self.bound.shift_remove(&dependency) {
                unbind(&dependency, listener);
            }
        }

        for dependency in next {
            self.bind(dependency.clone(), owner, computed);
        }
    }

    /// Remove every binding.
    pub fn release(&mut self) {
        for (dependency, listener) in self.bound.drain(..) {
            unbind(&dependency, listener);
        }
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.bound.keys()
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }
}

fn unbind(dependency: &Dependency, listener: ListenerId) {
    // An owner that is already gone took its listeners with it.
    if let Some(target) = dependency.owner() {
        target.off(listener);
        debug!(dependency = ?dependency, "unbound dependency");
    }
}
