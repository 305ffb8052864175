//! Tracking Context
//!
//! The tracking context records which attributes a getter reads while it
//! runs. Every `Model::get` checks for an active context and, if that
//! context is recording, registers `(model, attribute)` as a dependency.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Evaluating a computed attribute
//! pushes a frame, runs the getter, and pops the frame when the guard drops.
//! Nested evaluations (a computed attribute reading another computed
//! attribute) push their own frame, so each getter only sees its own reads.
//!
//! A frame can also be non-recording. Manual-mode getters run inside such a
//! frame so their reads do not leak into an enclosing evaluation.

use std::cell::RefCell;

use indexmap::IndexSet;
use tracing::trace;

use super::dependency::Dependency;
use crate::model::Model;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the tracking stack.
#[derive(Debug)]
struct Frame {
    /// Whether reads in this frame are recorded.
    recording: bool,
    /// Attributes read so far, deduplicated in first-seen order.
    dependencies: IndexSet<Dependency>,
}

/// Guard that pops its frame when dropped.
///
/// Dropping happens on every exit path, including a panicking getter, so the
/// stack never keeps a stale frame.
pub struct TrackingContext {
    depth: usize,
}

impl TrackingContext {
    /// Enter a recording frame.
    pub fn enter() -> Self {
        Self::push(true)
    }

    /// Enter a frame that ignores reads.
    pub fn enter_untracked() -> Self {
        Self::push(false)
    }

    fn push(recording: bool) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Frame {
                recording,
                dependencies: IndexSet::new(),
            });
            stack.len()
        });
        Self { depth }
    }

    /// Check whether the innermost frame records reads.
    pub fn is_recording() -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().last().is_some_and(|frame| frame.recording))
    }

    /// Record a read of `attribute` on `owner`.
    ///
    /// Called by `Model::get`. Does nothing outside a recording frame.
    pub fn record(owner: &Model, attribute: &str) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.last_mut().filter(|frame| frame.recording) else {
                return;
            };
            let dependency = Dependency::new(owner, attribute);
            if frame.dependencies.insert(dependency) {
                trace!(model = %owner.id(), attribute, "recorded dependency");
            }
        });
    }

    /// Take the dependencies recorded in this frame and leave it.
    pub fn finish(self) -> IndexSet<Dependency> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .get_mut(self.depth - 1)
                .map(|frame| std::mem::take(&mut frame.dependencies))
                .unwrap_or_default()
        })
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "TrackingContext mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop();
        });
    }
}

/// Result of a tracked evaluation.
#[derive(Debug)]
pub struct Tracked<R> {
    pub result: R,
    pub dependencies: IndexSet<Dependency>,
}

/// Run `f` and collect every attribute it reads.
///
/// If `f` panics the frame is popped while unwinding and the partial
/// dependency list is discarded.
pub fn track<R>(f: impl FnOnce() -> R) -> Tracked<R> {
    let context = TrackingContext::enter();
    let result = f();
    Tracked {
        result,
        dependencies: context.finish(),
    }
}

/// Run `f` without recording its reads into any enclosing evaluation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _context = TrackingContext::enter_untracked();
    f()
}
