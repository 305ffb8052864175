//! Trellis Core
//!
//! This crate extends a plain observable-attribute model with two kinds of
//! attributes that live outside persisted storage:
//!
//! - **Virtual attributes**: non-persisted values with the same get/set/change
//!   semantics as stored attributes.
//! - **Computed attributes**: derived values defined by a getter (and
//!   optionally a setter) that re-evaluate lazily when any attribute they
//!   read changes, including attributes of other models.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `model`: the `Model` handle, attribute stores, change events, snapshots
//! - `reactive`: dependency tracking, bindings, computed attributes, and the
//!   write coordinator with cycle detection
//!
//! A view layer only needs `get`, `set`, and `change:<name>` events; it does
//! not need to know which kind of attribute it is talking to.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use trellis_core::{Computed, Model};
//!
//! let model = Model::with_attributes([("payment", json!(100))]);
//!
//! model.add_computed(
//!     "paymentCurrency",
//!     Computed::new(|m, _| json!(format!("${}", m.get("payment"))))
//!         .setter(|_, value| {
//!             let amount = value.as_str()?.trim_start_matches('$').parse::<i64>().ok()?;
//!             Some([("payment".to_owned(), json!(amount))].into_iter().collect())
//!         }),
//! )?;
//!
//! assert_eq!(model.get("paymentCurrency"), json!("$100"));
//!
//! model.set("paymentCurrency", "$200")?;
//! assert_eq!(model.get("payment"), json!(200));
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod reactive;

pub use config::ModelConfig;
pub use error::{ModelError, Result};
pub use model::{ChangeEvent, ListenerId, Model, ModelId, Snapshot, WeakModel};
pub use reactive::{Computed, ComputedState, Dependency, DependencyMode, DependencySpec, Writes};
