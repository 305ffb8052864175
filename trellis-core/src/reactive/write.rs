//! Write Coordinator
//!
//! Resolves a `set` call into writes on stored and virtual attributes.
//! Writing a computed attribute runs its setter and resolves each returned
//! write in turn, so a setter may target other computed attributes.
//!
//! # Cycle Detection
//!
//! Every attribute being resolved is held in a thread-local in-flight set
//! for the duration of its resolution. Re-entering an attribute that is
//! still in flight fails with `CircularReference` instead of recursing.
//! The entry is removed by a guard, so an error or a panicking setter never
//! leaves a stale entry behind.
//!
//! Change propagation between computed attributes uses the same scheme to
//! stop notification loops. An attribute invalidated again after it was
//! re-read during its own delivery is not a loop; it asks the in-flight
//! delivery to run once more instead.

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread::LocalKey;

use serde_json::Value;
use tracing::warn;

use super::computed::Writes;
use crate::error::{ModelError, Result};
use crate::model::{Model, ModelId};

type Key = (ModelId, String);

thread_local! {
    static WRITES_IN_FLIGHT: RefCell<HashSet<Key>> = RefCell::new(HashSet::new());
    static NOTIFICATIONS_IN_FLIGHT: RefCell<HashSet<Key>> = RefCell::new(HashSet::new());
    static REDELIVERIES: RefCell<HashSet<Key>> = RefCell::new(HashSet::new());
}

/// Membership of one key in a thread-local in-flight set.
struct InFlight {
    slot: &'static LocalKey<RefCell<HashSet<Key>>>,
    key: Key,
}

impl InFlight {
    /// Insert the key, or return `None` if it is already present.
    fn enter(slot: &'static LocalKey<RefCell<HashSet<Key>>>, model: ModelId, attribute: &str) -> Option<Self> {
        let key = (model, attribute.to_owned());
        let inserted = slot.with(|set| set.borrow_mut().insert(key.clone()));
        inserted.then_some(Self { slot, key })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.slot.with(|set| {
            set.borrow_mut().remove(&self.key);
        });
    }
}

/// Marks an attribute as being written.
pub(crate) struct WriteGuard {
    _entry: InFlight,
}

impl WriteGuard {
    pub fn acquire(model: ModelId, attribute: &str) -> Result<Self> {
        match InFlight::enter(&WRITES_IN_FLIGHT, model, attribute) {
            Some(entry) => Ok(Self { _entry: entry }),
            None => {
                warn!(%model, attribute, "rejected circular setter reference");
                Err(ModelError::CircularReference(attribute.to_owned()))
            }
        }
    }
}

/// Marks a computed attribute's change notification as being delivered.
pub(crate) struct PropagationGuard {
    entry: InFlight,
}

impl PropagationGuard {
    pub fn enter(model: ModelId, attribute: &str) -> Option<Self> {
        InFlight::enter(&NOTIFICATIONS_IN_FLIGHT, model, attribute).map(|entry| Self { entry })
    }

    /// Ask the delivery in flight for this attribute to run again.
    pub fn request_redelivery(model: ModelId, attribute: &str) {
        REDELIVERIES.with(|set| {
            set.borrow_mut().insert((model, attribute.to_owned()));
        });
    }

    /// Consume a pending redelivery request for this guard's attribute.
    pub fn take_redelivery(&self) -> bool {
        REDELIVERIES.with(|set| set.borrow_mut().remove(&self.entry.key))
    }
}

impl Drop for PropagationGuard {
    fn drop(&mut self) {
        REDELIVERIES.with(|set| {
            set.borrow_mut().remove(&self.entry.key);
        });
    }
}

/// Number of attributes currently being written on this thread.
pub fn writes_in_flight() -> usize {
    WRITES_IN_FLIGHT.with(|set| set.borrow().len())
}

/// Resolve one write into `resolved`.
///
/// Plain attributes land in `resolved`; a repeated name keeps its first
/// position and takes the latest value. Computed attributes expand through
/// their setter.
pub(crate) fn resolve(model: &Model, attribute: String, value: Value, resolved: &mut Writes) -> Result<()> {
    let _guard = WriteGuard::acquire(model.id(), &attribute)?;

    match model.computed(&attribute) {
        Some(computed) => {
            for (name, value) in computed.write(model, value)? {
                resolve(model, name, value, resolved)?;
            }
        }
        None => {
            resolved.insert(attribute, value);
        }
    }

    Ok(())
}
