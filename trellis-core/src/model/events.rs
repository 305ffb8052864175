//! Change Notifications
//!
//! Listeners are keyed by event name. Attribute changes are published under
//! `"change:<attribute>"`, which is the only contract a view layer needs:
//! subscribe to the event, then call `get` to read the new value.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;
use smallvec::SmallVec;

use super::Model;

/// Prefix of every per-attribute change event.
pub const CHANGE_PREFIX: &str = "change:";

/// Build the change event name for an attribute.
pub fn change_event(attribute: &str) -> String {
    format!("{CHANGE_PREFIX}{attribute}")
}

/// Unique identifier for a registered listener.
///
/// Returned by [`Model::on`] and accepted by [`Model::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload delivered to change listeners.
pub struct ChangeEvent<'a> {
    model: &'a Model,
    attribute: &'a str,
    committed: Option<&'a Value>,
}

impl<'a> ChangeEvent<'a> {
    pub(crate) fn new(model: &'a Model, attribute: &'a str, committed: Option<&'a Value>) -> Self {
        Self {
            model,
            attribute,
            committed,
        }
    }

    /// The model whose attribute changed.
    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// Name of the changed attribute.
    pub fn attribute(&self) -> &'a str {
        self.attribute
    }

    /// The new value.
    ///
    /// Stored and virtual writes carry the committed value. Computed
    /// invalidations carry nothing, so the value is pulled through `get`,
    /// which re-evaluates the getter on demand.
    pub fn value(&self) -> Value {
        match self.committed {
            Some(value) => value.clone(),
            None => self.model.get(self.attribute),
        }
    }
}

impl fmt::Debug for ChangeEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("model", &self.model.id())
            .field("attribute", &self.attribute)
            .field("committed", &self.committed)
            .finish()
    }
}

/// Callback invoked with a change event.
pub type Callback = Rc<dyn Fn(&ChangeEvent<'_>)>;

type Entries = SmallVec<[(ListenerId, Callback); 4]>;

/// Listener table of one model.
#[derive(Default)]
pub(crate) struct Listeners {
    by_event: IndexMap<String, Entries>,
    events: HashMap<ListenerId, String>,
}

impl Listeners {
    pub fn add(&mut self, event: &str, callback: Callback) -> ListenerId {
        let id = ListenerId::new();
        self.by_event
            .entry(event.to_owned())
            .or_default()
            .push((id, callback));
        self.events.insert(id, event.to_owned());
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let Some(event) = self.events.remove(&id) else {
            return false;
        };
        if let Some(entries) = self.by_event.get_mut(&event) {
            entries.retain(|(entry, _)| *entry != id);
            if entries.is_empty() {
                self.by_event.shift_remove(&event);
            }
        }
        true
    }

    /// Copy the callbacks of an event so they can run without a borrow held.
    pub fn callbacks(&self, event: &str) -> SmallVec<[Callback; 4]> {
        self.by_event
            .get(event)
            .map(|entries| entries.iter().map(|(_, cb)| Rc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, SmallVec::len)
    }

    pub fn total(&self) -> usize {
        self.events.len()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_event.iter().map(|(event, entries)| (event, entries.len())))
            .finish()
    }
}
