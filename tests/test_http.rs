//! End-to-end scenarios: flux files on disk, routes bound through the
//! engine, requests driven through the router without a socket.

use anyhow::Result;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use fluxflow_rs::prelude::*;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Write flux files into a tempdir and prepare an engine around them. The
/// tempdir is returned so it outlives the test body.
async fn router_with(
    fluxes: &[Value],
    configure: impl FnOnce(FluxEngineBuilder) -> FluxEngineBuilder,
) -> Result<(Router, FluxEngine, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    for (i, flux) in fluxes.iter().enumerate() {
        std::fs::write(
            dir.path().join(format!("flux_{}.json", i)),
            serde_json::to_string_pretty(flux)?,
        )?;
    }

    let mut config = EngineConfig::default();
    config.paths.flux = dir.path().to_path_buf();

    let mut engine = configure(FluxEngine::builder().config(config)).build()?;
    let router = engine.prepare().await?;
    Ok((router, engine, dir))
}

async fn call(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_echo_scenario() -> Result<()> {
    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/hello", "method": "GET",
            "flow": [
                {"type": "action", "name": "r", "path": "hello"},
                {"type": "return", "body": "${r}"}
            ]
        })],
        |b| b.register_action("hello", |_| async { Ok(json!({"message": "hi"})) }),
    )
    .await?;

    let (status, body) = call(&router, get("/hello")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "hi"}));
    Ok(())
}

#[tokio::test]
async fn test_branch_scenario() -> Result<()> {
    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/branch", "method": "POST",
            "flow": [
                {"type": "condition", "if": "${input.flag}",
                 "then": [{"type": "return", "body": "yes"}],
                 "else": [{"type": "return", "body": "no"}]}
            ]
        })],
        |b| b,
    )
    .await?;

    let (status, body) = call(&router, post("/branch", json!({"flag": true}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("yes"));

    let (status, body) = call(&router, post("/branch", json!({"flag": false}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("no"));
    Ok(())
}

#[tokio::test]
async fn test_loop_scenario() -> Result<()> {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();

    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/loop", "method": "POST",
            "flow": [
                {"type": "forEach", "items": "${input.xs}", "as": "x",
                 "do": [{"type": "action", "name": "d", "path": "double"}]}
            ]
        })],
        move |b| {
            b.register_action("double", move |ctx| {
                let sink = sink.clone();
                async move {
                    let x = ctx
                        .binding("x")
                        .and_then(|v| v.as_i64())
                        .unwrap_or_default();
                    sink.lock().unwrap().push(x);
                    Ok(json!(x * 2))
                }
            })
        },
    )
    .await?;

    let (status, body) = call(&router, post("/loop", json!({"xs": [1, 2, 3]}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    assert_eq!(*observed.lock().unwrap(), vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn test_try_catch_scenario() -> Result<()> {
    let caught = Arc::new(Mutex::new(Value::Null));
    let sink = caught.clone();

    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/try", "method": "GET",
            "flow": [
                {"type": "try",
                 "try": [{"type": "action", "name": "x", "path": "bomb"}],
                 "catch": [
                    {"type": "action", "name": "seen", "path": "capture",
                     "args": {"message": "${e.message}"}},
                    {"type": "return", "body": "caught"}
                 ],
                 "errorVar": "e"}
            ]
        })],
        move |b| {
            b.register_action("bomb", |_| async { Err("boom".into()) })
                .register_action("capture", move |ctx| {
                    let sink = sink.clone();
                    async move {
                        let message = ctx
                            .args()
                            .and_then(|a| a.get("message").cloned())
                            .unwrap_or(Value::Null);
                        *sink.lock().unwrap() = message;
                        Ok(Value::Null)
                    }
                })
        },
    )
    .await?;

    let (status, body) = call(&router, get("/try")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("caught"));
    assert_eq!(*caught.lock().unwrap(), json!("boom"));
    Ok(())
}

#[tokio::test]
async fn test_parallel_scenario() -> Result<()> {
    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/par", "method": "GET",
            "flow": [
                {"type": "parallel", "branches": [
                    [{"type": "action", "name": "b1", "path": "one"}],
                    [{"type": "action", "name": "b2", "path": "two"}]
                ]},
                {"type": "return", "body": "${results}"}
            ]
        })],
        |b| {
            b.register_action("one", |_| async { Ok(json!("r1")) })
                .register_action("two", |_| async { Ok(json!("r2")) })
        },
    )
    .await?;

    let (status, body) = call(&router, get("/par")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"b1": "r1", "b2": "r2"}));
    Ok(())
}

#[tokio::test]
async fn test_invalid_flux_route_not_registered() -> Result<()> {
    let (router, engine, _dir) = router_with(
        &[
            json!({
                "endpoint": "/broken", "method": "GET",
                "flow": [{"type": "action", "name": "x"}]
            }),
            json!({
                "endpoint": "/alive", "method": "GET",
                "flow": [{"type": "return", "body": "ok"}]
            }),
        ],
        |b| b,
    )
    .await?;

    // The invalid flux is reported but the server starts with the rest.
    let errors = engine.flux_errors();
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0]
            .errors
            .iter()
            .any(|e| e.path.starts_with("flow[0]"))
    );

    let (status, _) = call(&router, get("/broken")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&router, get("/alive")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
    Ok(())
}

#[tokio::test]
async fn test_path_params_and_query_merge_into_input() -> Result<()> {
    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/users/:id", "method": "GET",
            "flow": [{"type": "return",
                      "body": {"id": "${input.id}", "verbose": "${input.verbose}"}}]
        })],
        |b| b,
    )
    .await?;

    let (status, body) = call(&router, get("/users/42?verbose=yes")).await?;
    assert_eq!(status, StatusCode::OK);
    // Path and query parameters arrive as strings.
    assert_eq!(body, json!({"id": "42", "verbose": "yes"}));
    Ok(())
}

#[tokio::test]
async fn test_uncaught_failure_is_opaque_500() -> Result<()> {
    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/explode", "method": "GET",
            "flow": [{"type": "action", "name": "x", "path": "bomb"}]
        })],
        |b| b.register_action("bomb", |_| async { Err("secret detail".into()) }),
    )
    .await?;

    let (status, body) = call(&router, get("/explode")).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));
    Ok(())
}

#[tokio::test]
async fn test_return_status_override() -> Result<()> {
    let (router, _engine, _dir) = router_with(
        &[json!({
            "endpoint": "/created", "method": "POST",
            "flow": [{"type": "return", "status": 201, "body": {"ok": true}}]
        })],
        |b| b,
    )
    .await?;

    let (status, body) = call(&router, post("/created", json!({}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"ok": true}));
    Ok(())
}

#[cfg(feature = "memory-plugin")]
#[tokio::test]
async fn test_memory_plugin_shared_across_requests() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("count.json"),
        json!({
            "endpoint": "/count", "method": "POST",
            "flow": [
                {"type": "action", "name": "n", "path": "bump"},
                {"type": "return", "body": "${n}"}
            ]
        })
        .to_string(),
    )?;

    let config: EngineConfig = serde_json::from_value(json!({
        "paths": {"flux": dir.path()},
        "plugins": {"cache": {"type": "memory"}}
    }))?;

    let mut engine = FluxEngine::builder()
        .config(config)
        .register_action("bump", |ctx| async move {
            let cache = ctx
                .plugin_as::<MemoryClient>("cache")
                .ok_or_else(|| ActionError::msg("cache plugin missing"))?;
            let next = cache.get("n").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            cache.set("n", json!(next));
            Ok(json!(next))
        })
        .build()?;
    let router = engine.prepare().await?;

    for expected in 1..=3 {
        let (status, body) = call(&router, post("/count", json!({}))).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(expected));
    }
    Ok(())
}
