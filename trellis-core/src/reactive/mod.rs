//! Reactive Attributes
//!
//! This module implements the dependency graph engine behind computed
//! attributes: tracking, binding, lazy re-evaluation, and write-back.
//!
//! # Concepts
//!
//! ## Tracking
//!
//! While a getter runs, every `Model::get` it performs (on its own model or
//! on any other model it can reach) is recorded in a thread-local tracking
//! frame. The recorded `(model, attribute)` pairs become the attribute's
//! dependencies.
//!
//! ## Bindings
//!
//! Each dependency is bound by listening for `change:<attribute>` on its
//! owner. A firing binding marks the computed attribute dirty and emits the
//! computed attribute's own change event. Nothing is recomputed until the
//! next read.
//!
//! ## Manual dependencies
//!
//! A getter that reads attributes conditionally cannot be fully discovered
//! by tracking. Declaring its dependencies binds all of them up front and
//! hands their values to the getter as arguments.
//!
//! ## Write-back
//!
//! A setter turns a write on a computed attribute into writes on other
//! attributes. Chains of setters are resolved recursively, with cycles
//! rejected as errors.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded and synchronous. The only shared
//! mutable state is the tracking stack and the in-flight write set, both
//! thread-local and released by guards.

mod binding;
mod computed;
mod context;
mod dependency;
mod write;

pub use computed::{Computed, ComputedState, DependencyMode, Getter, Setter, Writes};
pub use context::{track, untracked, Tracked, TrackingContext};
pub use dependency::{Dependency, DependencySpec};
pub use write::writes_in_flight;

pub(crate) use computed::ComputedAttribute;
pub(crate) use write::resolve;
