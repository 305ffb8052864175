//! Integration Tests for Virtual and Computed Attributes
//!
//! These tests drive models only through the public surface a view layer
//! uses: `get`, `set`, `add_computed`, and change events.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use trellis_core::{Computed, ComputedState, DependencyMode, DependencySpec, Model, ModelError, Writes};

/// Render a value the way string concatenation would.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn full_name() -> Computed {
    Computed::new(|m, _| {
        json!(format!(
            "{} {}",
            text(&m.get("firstName")),
            text(&m.get("lastName"))
        ))
    })
}

fn payment_currency() -> Computed {
    Computed::new(|m, _| json!(format!("${}", text(&m.get("payment"))))).setter(|_, value| {
        let amount = value.as_str()?.trim_start_matches('$').parse::<i64>().ok()?;
        Some(Writes::from([("payment".to_owned(), json!(amount))]))
    })
}

fn payment_label() -> Computed {
    Computed::new(|m, _| {
        json!(format!(
            "{} paid {}",
            text(&m.get("fullName")),
            text(&m.get("paymentCurrency"))
        ))
    })
}

fn charlie() -> Model {
    let model = Model::with_attributes([
        ("firstName", json!("Charlie")),
        ("lastName", json!("Brown")),
        ("payment", json!(100)),
    ]);
    model.add_computed("fullName", full_name()).unwrap();
    model.add_computed("paymentCurrency", payment_currency()).unwrap();
    model.add_computed("paymentLabel", payment_label()).unwrap();
    model
}

fn counter(model: &Model, attribute: &str) -> Arc<AtomicI32> {
    let count = Arc::new(AtomicI32::new(0));
    let count_clone = count.clone();
    model.on_change(attribute, move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// The full label follows a change two computed layers down.
#[test]
fn payment_label_scenario() {
    let model = charlie();

    assert_eq!(model.get("fullName"), json!("Charlie Brown"));
    assert_eq!(model.get("paymentLabel"), json!("Charlie Brown paid $100"));

    model.set("payment", 150).unwrap();
    assert_eq!(model.get("paymentLabel"), json!("Charlie Brown paid $150"));
}

/// The getter runs at most once between invalidations.
#[test]
fn computed_is_lazy() {
    let call_count = Arc::new(AtomicI32::new(0));
    let call_count_clone = call_count.clone();

    let model = Model::with_attributes([("firstName", json!("Charlie"))]);
    model
        .add_computed(
            "greeting",
            Computed::new(move |m, _| {
                call_count_clone.fetch_add(1, Ordering::SeqCst);
                json!(format!("Hi {}", text(&m.get("firstName"))))
            }),
        )
        .unwrap();

    // Nothing runs until the first read.
    assert_eq!(call_count.load(Ordering::SeqCst), 0);
    assert_eq!(model.computed_state("greeting"), Some(ComputedState::Dirty));

    for _ in 0..3 {
        assert_eq!(model.get("greeting"), json!("Hi Charlie"));
    }
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    // Invalidation does not re-evaluate eagerly.
    model.set("firstName", "Sally").unwrap();
    assert_eq!(model.computed_state("greeting"), Some(ComputedState::Dirty));
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    assert_eq!(model.get("greeting"), json!("Hi Sally"));
    assert_eq!(model.get("greeting"), json!("Hi Sally"));
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

/// Changing any attribute the getter read produces exactly one notification.
#[test]
fn auto_discovered_dependencies_notify_once() {
    let model = Model::with_attributes([("a", json!(1)), ("b", json!(2))]);
    model
        .add_computed(
            "sum",
            Computed::new(|m, _| {
                json!(m.get("a").as_i64().unwrap_or(0) + m.get("b").as_i64().unwrap_or(0))
            }),
        )
        .unwrap();
    let notified = counter(&model, "sum");

    assert_eq!(model.get("sum"), json!(3));
    assert_eq!(model.dependency_mode("sum"), Some(DependencyMode::Auto));

    model.set("a", 10).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(model.get("sum"), json!(12));

    model.set("b", 20).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 2);
    assert_eq!(model.get("sum"), json!(30));

    // Writing an equal value is not a change.
    model.set("b", 20).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

/// Definition order of dependent computed attributes does not matter.
#[test]
fn definition_order_is_irrelevant() {
    let forward = Model::with_attributes([("firstName", json!("Charlie")), ("lastName", json!("Brown"))]);
    forward.add_computed("fullName", full_name()).unwrap();
    forward
        .add_computed("shout", Computed::new(|m, _| json!(text(&m.get("fullName")).to_uppercase())))
        .unwrap();

    let backward = Model::with_attributes([("firstName", json!("Charlie")), ("lastName", json!("Brown"))]);
    backward
        .add_computed("shout", Computed::new(|m, _| json!(text(&m.get("fullName")).to_uppercase())))
        .unwrap();
    backward.add_computed("fullName", full_name()).unwrap();

    let forward_count = counter(&forward, "shout");
    let backward_count = counter(&backward, "shout");

    for model in [&forward, &backward] {
        assert_eq!(model.get("shout"), json!("CHARLIE BROWN"));
        model.set("lastName", "Van Pelt").unwrap();
        assert_eq!(model.get("shout"), json!("CHARLIE VAN PELT"));
    }

    assert_eq!(forward_count.load(Ordering::SeqCst), 1);
    assert_eq!(backward_count.load(Ordering::SeqCst), 1);
}

/// Declared dependencies stay bound even when the getter skips them.
#[test]
fn manual_dependencies_cover_conditional_reads() {
    let model = Model::with_attributes([("firstName", json!("Charlie")), ("lastName", json!("Brown"))]);
    model.add_virtual("isSelected", json!(false)).unwrap();
    model
        .add_computed(
            "displayName",
            Computed::new(|_, deps| {
                if deps[2] == json!(true) {
                    deps[1].clone()
                } else {
                    deps[0].clone()
                }
            })
            .deps(["firstName", "lastName", "isSelected"]),
        )
        .unwrap();

    assert_eq!(model.dependency_mode("displayName"), Some(DependencyMode::Manual));
    // Bound at registration, before any read.
    assert_eq!(model.listener_count("change:lastName"), 1);

    assert_eq!(model.get("displayName"), json!("Charlie"));

    model.set("firstName", "Sally").unwrap();
    assert_eq!(model.get("displayName"), json!("Sally"));

    model.set("lastName", "Van Pelt").unwrap();
    assert_eq!(model.get("displayName"), json!("Sally"));

    model.set("isSelected", true).unwrap();
    assert_eq!(model.get("displayName"), json!("Van Pelt"));

    // Manual bindings are never rediscovered.
    assert_eq!(model.dependencies("displayName").len(), 3);
}

/// A setter's mapping is applied to the underlying attributes.
#[test]
fn setter_writes_back() {
    let model = charlie();
    assert_eq!(model.get("paymentCurrency"), json!("$100"));

    model.set("paymentCurrency", "$200").unwrap();
    assert_eq!(model.get("payment"), json!(200));
    assert_eq!(model.get("paymentCurrency"), json!("$200"));
    assert_eq!(model.get("paymentLabel"), json!("Charlie Brown paid $200"));

    // Unparseable input maps to no writes.
    model.set("paymentCurrency", "lots").unwrap();
    assert_eq!(model.get("payment"), json!(200));
}

/// A setter may write to another computed attribute.
#[test]
fn setters_chain_through_computed_attributes() {
    let model = charlie();
    model
        .add_computed(
            "label",
            Computed::new(|m, _| m.get("paymentCurrency")).setter(|_, value| {
                Some(Writes::from([("paymentCurrency".to_owned(), value)]))
            }),
        )
        .unwrap();

    model.set("label", "$75").unwrap();
    assert_eq!(model.get("payment"), json!(75));
    assert_eq!(model.get("label"), json!("$75"));
}

#[test]
fn read_only_computed_rejects_writes() {
    let model = charlie();
    assert_eq!(
        model.set("fullName", "Linus Van Pelt"),
        Err(ModelError::ReadOnly("fullName".into()))
    );
    assert_eq!(model.get("fullName"), json!("Charlie Brown"));
}

/// Computed attributes follow attributes of other models.
#[test]
fn cross_instance_dependency() {
    let rates = Model::with_attributes([("rate", json!(2))]);
    let order = Model::with_attributes([("amount", json!(10))]);

    let rates_handle = rates.clone();
    order
        .add_computed(
            "total",
            Computed::new(move |m, _| {
                json!(m.get("amount").as_i64().unwrap_or(0) * rates_handle.get("rate").as_i64().unwrap_or(0))
            }),
        )
        .unwrap();
    let notified = counter(&order, "total");

    assert_eq!(order.get("total"), json!(20));
    assert_eq!(rates.listener_count("change:rate"), 1);

    rates.set("rate", 3).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(order.get("total"), json!(30));

    // Teardown releases the foreign binding and is idempotent.
    order.clear_virtuals();
    assert_eq!(rates.listener_count("change:rate"), 0);
    assert_eq!(order.listener_count("change:amount"), 0);
    order.clear_virtuals();
    rates.clear_virtuals();

    rates.set("rate", 4).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert!(!order.has_virtual("total"));
    assert_eq!(order.get("total"), Value::Null);
}

/// Foreign computed attributes propagate their own invalidations.
#[test]
fn cross_instance_computed_dependency() {
    let source = Model::with_attributes([("base", json!(1))]);
    source
        .add_computed("double", Computed::new(|m, _| json!(m.get("base").as_i64().unwrap_or(0) * 2)))
        .unwrap();

    let view = Model::new();
    view.add_computed("label", Computed::new(|_, deps| json!(format!("x{}", text(&deps[0])))).deps([("double", &source)]))
        .unwrap();

    assert_eq!(view.get("label"), json!("x2"));
    source.set("base", 5).unwrap();
    assert_eq!(view.get("label"), json!("x10"));
}

/// Dropping a model releases the bindings it holds elsewhere.
#[test]
fn dropping_a_model_releases_foreign_bindings() {
    let rates = Model::with_attributes([("rate", json!(2))]);
    {
        let order = Model::new();
        let weak_rates = rates.downgrade();
        order
            .add_computed(
                "rate",
                Computed::new(move |_, _| weak_rates.upgrade().map(|r| r.get("rate")).unwrap_or(Value::Null)),
            )
            .unwrap();
        assert_eq!(order.get("rate"), json!(2));
        assert_eq!(rates.listener_count("change:rate"), 1);
    }
    assert_eq!(rates.listener_count("change:rate"), 0);
}

/// A foreign model may go away first without breaking teardown.
#[test]
fn foreign_model_dropped_before_teardown() {
    let order = Model::new();
    {
        let rates = Model::with_attributes([("rate", json!(2))]);
        order
            .add_computed("rate", Computed::new(|_, deps| deps[0].clone()).deps([("rate", &rates)]))
            .unwrap();
        assert_eq!(order.get("rate"), json!(2));
    }

    order.clear_virtuals();
    order.clear_virtuals();
}

/// Setters that write to each other fail instead of recursing.
#[test]
fn circular_setters_are_rejected() {
    let model = Model::new();
    model
        .add_computed(
            "a",
            Computed::new(|m, _| m.get("x"))
                .setter(|_, value| Some(Writes::from([("b".to_owned(), value)]))),
        )
        .unwrap();
    model
        .add_computed(
            "b",
            Computed::new(|m, _| m.get("x"))
                .setter(|_, value| Some(Writes::from([("a".to_owned(), value)]))),
        )
        .unwrap();

    assert_eq!(model.set("a", 1), Err(ModelError::CircularReference("a".into())));
    assert_eq!(model.set("b", 1), Err(ModelError::CircularReference("b".into())));
    assert_eq!(trellis_core::reactive::writes_in_flight(), 0);

    // Nothing from the failed batch is committed.
    assert_eq!(model.set_many([("x", json!(1)), ("a", json!(2))]).map_err(|_| ()), Err(()));
    assert_eq!(model.get("x"), Value::Null);

    // The guard is released, so unrelated writes still work.
    model.set("x", 3).unwrap();
    assert_eq!(model.get("a"), json!(3));
}

/// A batch notifies each attribute once, in first-touched order, after
/// every value has been committed.
#[test]
fn batched_notifications_are_coalesced_in_order() {
    let model = Model::new();
    let events = Rc::new(RefCell::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let events = events.clone();
        model.on_change(name, move |event| {
            let snapshot = event.model().snapshot().to_json();
            events
                .borrow_mut()
                .push((event.attribute().to_owned(), event.value(), snapshot));
        });
    }

    model
        .set_many([("b", json!(1)), ("a", json!(1)), ("b", json!(2)), ("c", json!(3))])
        .unwrap();

    let events = events.borrow();
    let order: Vec<_> = events.iter().map(|(name, value, _)| (name.as_str(), value.clone())).collect();
    assert_eq!(order, vec![("b", json!(2)), ("a", json!(1)), ("c", json!(3))]);

    for (_, _, snapshot) in events.iter() {
        assert_eq!(snapshot, &json!({"b": 2, "a": 1, "c": 3}));
    }
}

/// A setter that fans out into several writes commits all of them.
#[test]
fn setter_fan_out_commits_every_write() {
    let model = charlie();
    model
        .add_computed(
            "name",
            Computed::new(|m, _| m.get("fullName")).setter(|_, value| {
                let full = value.as_str()?.to_owned();
                let (first, last) = full.split_once(' ')?;
                Some(Writes::from([
                    ("firstName".to_owned(), json!(first)),
                    ("lastName".to_owned(), json!(last)),
                ]))
            }),
        )
        .unwrap();
    let first = counter(&model, "firstName");
    let last = counter(&model, "lastName");

    model.set("name", "Linus Van Pelt").unwrap();

    assert_eq!(model.get("firstName"), json!("Linus"));
    assert_eq!(model.get("lastName"), json!("Van Pelt"));
    assert_eq!(model.get("name"), json!("Linus Van Pelt"));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 1);
}

/// Invalidation travels through layers of computed attributes, and the
/// event's value is pulled on demand.
#[test]
fn change_events_propagate_through_computed_layers() {
    let model = charlie();
    let labels = Rc::new(RefCell::new(Vec::new()));
    let labels_clone = labels.clone();
    model.on_change("paymentLabel", move |event| {
        labels_clone.borrow_mut().push(event.value());
    });

    assert_eq!(model.get("paymentLabel"), json!("Charlie Brown paid $100"));

    model.set("firstName", "Linus").unwrap();
    model.set("payment", 5).unwrap();

    assert_eq!(
        *labels.borrow(),
        vec![json!("Linus Brown paid $100"), json!("Linus Brown paid $5")]
    );
}

/// A listener that re-reads and writes during delivery never leaves a
/// dependent attribute on a stale cache.
#[test]
fn writes_from_change_listeners_reach_dependents() {
    let model = Model::with_attributes([("first", json!("A")), ("last", json!("B"))]);
    model
        .add_computed(
            "full",
            Computed::new(|m, _| json!(format!("{} {}", text(&m.get("first")), text(&m.get("last"))))),
        )
        .unwrap();
    model
        .add_computed("label", Computed::new(|m, _| json!(text(&m.get("full")).to_uppercase())))
        .unwrap();
    assert_eq!(model.get("label"), json!("A B"));

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    model.on_change("full", move |event| {
        let model = event.model();
        seen_clone.borrow_mut().push(model.get("label"));
        model.set("last", "C").unwrap();
    });

    model.set("first", "X").unwrap();

    assert_eq!(model.get("full"), json!("X C"));
    assert_eq!(model.get("label"), json!("X C"));
    assert_eq!(*seen.borrow(), vec![json!("X B"), json!("X C")]);
}

/// Subscribing to a computed attribute is enough to hear its changes.
#[test]
fn listeners_hear_changes_before_the_first_read() {
    let model = Model::with_attributes([("a", json!(1))]);
    model.add_computed("b", Computed::new(|m, _| m.get("a"))).unwrap();

    let notified = counter(&model, "b");
    model.set("a", 2).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(model.get("b"), json!(2));

    // Listeners may also come before the attribute is defined.
    let early = counter(&model, "c");
    model
        .add_computed("c", Computed::new(|m, _| json!(m.get("a").as_i64().unwrap_or(0) * 10)))
        .unwrap();
    model.set("a", 3).unwrap();
    assert_eq!(early.load(Ordering::SeqCst), 1);
    assert_eq!(model.get("c"), json!(30));
}

/// Declared dependencies may mix local names and attributes of other models.
#[test]
fn manual_dependencies_mix_local_and_foreign() {
    let catalog = Model::with_attributes([("currency", json!("EUR"))]);
    let order = Model::with_attributes([("amount", json!(10))]);
    order
        .add_computed(
            "price",
            Computed::new(|_, deps| json!(format!("{} {}", text(&deps[0]), text(&deps[1]))))
                .deps([DependencySpec::from("amount"), ("currency", &catalog).into()]),
        )
        .unwrap();

    let bound: Vec<_> = order
        .dependencies("price")
        .iter()
        .map(|d| (d.owner_id(), d.attribute().to_owned()))
        .collect();
    assert_eq!(
        bound,
        vec![(order.id(), "amount".to_owned()), (catalog.id(), "currency".to_owned())]
    );
    assert_eq!(catalog.listener_count("change:currency"), 1);
    assert_eq!(order.get("price"), json!("10 EUR"));

    let notified = counter(&order, "price");
    order.set("amount", 12).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(order.get("price"), json!("12 EUR"));

    catalog.set("currency", "USD").unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 2);
    assert_eq!(order.get("price"), json!("12 USD"));
}

/// Getters that read each other neither overflow nor loop on notification.
#[test]
fn read_cycles_terminate() {
    let model = Model::with_attributes([("base", json!(1))]);
    model
        .add_computed(
            "x",
            Computed::new(|m, _| json!([m.get("base"), m.get("y")])),
        )
        .unwrap();
    model
        .add_computed("y", Computed::new(|m, _| json!({"x": m.get("x")})))
        .unwrap();

    assert_eq!(model.get("x"), json!([1, {"x": null}]));

    let notified = counter(&model, "x");
    model.set("base", 2).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

/// Teardown removes local bindings and all virtual state.
#[test]
fn clear_virtuals_is_complete_and_idempotent() {
    let model = charlie();
    model.add_virtual("isSelected", json!(true)).unwrap();
    assert_eq!(model.get("paymentLabel"), json!("Charlie Brown paid $100"));
    assert_eq!(model.listener_count("change:firstName"), 1);

    model.clear_virtuals();

    for name in ["fullName", "paymentCurrency", "paymentLabel", "isSelected"] {
        assert!(!model.has_virtual(name));
        assert_eq!(model.get(name), Value::Null);
    }
    assert_eq!(model.listener_count("change:firstName"), 0);
    assert_eq!(model.listener_count("change:payment"), 0);
    assert_eq!(model.get("firstName"), json!("Charlie"));

    model.clear_virtuals();

    // Names are free again.
    model.add_computed("fullName", full_name()).unwrap();
    assert_eq!(model.get("fullName"), json!("Charlie Brown"));
}

/// Only stored attributes are persisted.
#[test]
fn snapshot_excludes_virtual_and_computed() {
    let model = charlie();
    model.add_virtual("isSelected", json!(false)).unwrap();
    model.set("isSelected", true).unwrap();

    let snapshot = model.snapshot();
    assert_eq!(
        snapshot.to_json(),
        json!({"firstName": "Charlie", "lastName": "Brown", "payment": 100})
    );

    let restored = Model::with_attributes(trellis_core::Snapshot::from_msgpack(&snapshot.to_msgpack().unwrap()).unwrap());
    restored.add_computed("fullName", full_name()).unwrap();
    assert_eq!(restored.get("fullName"), json!("Charlie Brown"));
}
