//! # Router Binding
//!
//! Thin layer between the loaded flux table and axum. Each definition
//! becomes one route at `(method, endpoint)`; the handler builds a fresh
//! request context (merging body, query and path parameters into `input`),
//! delegates to the executor, and renders the response the flow stored.
//!
//! Endpoint patterns use the source's colon syntax (`/users/:id`) and are
//! translated to axum's `{id}` captures at registration time.

use crate::config::{CorsConfig, CorsOrigin};
use crate::context::{FluxContext, RequestInfo};
use crate::executor::Executor;
use crate::flux::{FluxDefinition, HttpMethod};
use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, on};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{Instrument, info, info_span, warn};

/// Build an axum router serving every loaded flux definition.
pub fn build_router(
    definitions: &[Arc<FluxDefinition>],
    executor: Arc<Executor>,
    cors: Option<&CorsConfig>,
) -> Router {
    let mut router = Router::new();

    for def in definitions {
        let path = axum_path(&def.endpoint);
        let filter = method_filter(def.method);
        let def = def.clone();
        let executor = executor.clone();

        info!(route = %def, "route registered");

        let handler = move |method: Method,
                            uri: Uri,
                            Path(params): Path<HashMap<String, String>>,
                            Query(query): Query<HashMap<String, String>>,
                            headers: HeaderMap,
                            body: Bytes| {
            let def = def.clone();
            let executor = executor.clone();
            async move { serve_flux(&def, &executor, method, uri, params, query, headers, body).await }
        };

        router = router.route(&path, on(filter, handler));
    }

    match cors {
        Some(config) => router.layer(cors_layer(config)),
        None => router,
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_flux(
    def: &FluxDefinition,
    executor: &Executor,
    method: Method,
    uri: Uri,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RequestInfo {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect(),
    };

    let input = FluxContext::merge_input(parse_body(&body), query, params);
    let ctx = Arc::new(FluxContext::new(request, input));

    let span = info_span!("flux", route = %def, request_id = %ctx.request_id());
    executor.execute_flux(def, &ctx).instrument(span).await;

    match ctx.take_response() {
        Some(stored) => {
            let status = StatusCode::from_u16(stored.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(stored.body)).into_response()
        }
        // The executor always stores a response; this is a defensive guard
        // only reachable if a handler consumed it out of band.
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "request body is not JSON; ignored for input merge");
            Value::Null
        }
    }
}

/// Translate `/users/:id` into axum's `/users/{id}`.
fn axum_path(endpoint: &str) -> String {
    endpoint
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::GET => MethodFilter::GET,
        HttpMethod::POST => MethodFilter::POST,
        HttpMethod::PUT => MethodFilter::PUT,
        HttpMethod::DELETE => MethodFilter::DELETE,
        HttpMethod::PATCH => MethodFilter::PATCH,
        HttpMethod::OPTIONS => MethodFilter::OPTIONS,
        HttpMethod::HEAD => MethodFilter::HEAD,
    }
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    match &config.origin {
        Some(CorsOrigin::Any(true)) => layer = layer.allow_origin(AllowOrigin::any()),
        Some(CorsOrigin::Any(false)) | None => {}
        Some(CorsOrigin::One(origin)) => match origin.parse::<HeaderValue>() {
            Ok(value) => layer = layer.allow_origin(value),
            Err(_) => warn!(origin = %origin, "invalid CORS origin ignored"),
        },
        Some(CorsOrigin::Many(origins)) => {
            let values: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| {
                    let parsed = o.parse::<HeaderValue>().ok();
                    if parsed.is_none() {
                        warn!(origin = %o, "invalid CORS origin ignored");
                    }
                    parsed
                })
                .collect();
            layer = layer.allow_origin(values);
        }
    }

    if let Some(credentials) = config.credentials {
        layer = layer.allow_credentials(credentials);
    }

    if let Some(methods) = &config.methods {
        let methods: Vec<Method> = methods
            .iter()
            .filter_map(|m| m.parse::<Method>().ok())
            .collect();
        layer = layer.allow_methods(methods);
    }

    if let Some(headers) = &config.allowed_headers {
        let headers: Vec<HeaderName> = headers
            .iter()
            .filter_map(|h| h.parse::<HeaderName>().ok())
            .collect();
        layer = layer.allow_headers(headers);
    }

    if let Some(headers) = &config.exposed_headers {
        let headers: Vec<HeaderName> = headers
            .iter()
            .filter_map(|h| h.parse::<HeaderName>().ok())
            .collect();
        layer = layer.expose_headers(headers);
    }

    if let Some(max_age) = config.max_age {
        layer = layer.max_age(Duration::from_secs(max_age));
    }

    layer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axum_path_translation() {
        assert_eq!(axum_path("/users/:id"), "/users/{id}");
        assert_eq!(axum_path("/a/:b/c/:d"), "/a/{b}/c/{d}");
        assert_eq!(axum_path("/plain"), "/plain");
        assert_eq!(axum_path("/"), "/");
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::new()), Value::Null);
        assert_eq!(
            parse_body(&Bytes::from_static(b"{\"a\":1}")),
            serde_json::json!({"a": 1})
        );
        assert_eq!(parse_body(&Bytes::from_static(b"not json")), Value::Null);
    }
}
