//! Interpolation and condition behaviour through the public API.

use fluxflow_rs::context::{FluxContext, RequestInfo};
use fluxflow_rs::{evaluate_condition, resolve};
use serde_json::{Map, Value, json};

fn context_with(bindings: Value) -> FluxContext {
    let ctx = FluxContext::new(RequestInfo::default(), Map::new());
    if let Value::Object(fields) = bindings {
        for (k, v) in fields {
            ctx.set_binding(k, v);
        }
    }
    ctx
}

#[test]
fn test_round_trip_of_placeholder_free_values() {
    let ctx = context_with(json!({}));
    let samples = [
        json!(null),
        json!(0),
        json!(-3.5),
        json!(true),
        json!(""),
        json!("plain text with } and $ but no placeholder"),
        json!([1, "two", null, {"three": 3}]),
        json!({"nested": {"deep": [{"x": 0.25}]}}),
    ];

    for sample in samples {
        let serialized = serde_json::to_string(&sample).unwrap();
        let reparsed: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(resolve(&reparsed, &ctx), sample);
    }
}

#[test]
fn test_unset_path_is_null() {
    let ctx = context_with(json!({}));
    assert_eq!(resolve(&json!("${a.b.c}"), &ctx), Value::Null);
}

#[test]
fn test_zero_interpolates_into_strings() {
    let ctx = context_with(json!({"n": 0}));
    assert_eq!(resolve(&json!("x=${n}"), &ctx), json!("x=0"));
}

#[test]
fn test_condition_boundaries() {
    assert!(evaluate_condition(
        &json!("${n} === 0"),
        &context_with(json!({"n": 0}))
    ));
    assert!(!evaluate_condition(
        &json!("!${flag}"),
        &context_with(json!({"flag": true}))
    ));
}

#[test]
fn test_value_mode_keeps_native_types_through_nesting() {
    let ctx = context_with(json!({
        "user": {"id": 7, "roles": ["admin", "ops"]},
        "count": 2
    }));

    let body = resolve(
        &json!({
            "id": "${user.id}",
            "first_role": "${user.roles.0}",
            "summary": "user ${user.id} has ${count} roles"
        }),
        &ctx,
    );

    assert_eq!(
        body,
        json!({
            "id": 7,
            "first_role": "admin",
            "summary": "user 7 has 2 roles"
        })
    );
}
