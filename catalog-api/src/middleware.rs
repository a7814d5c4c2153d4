//! Common middleware stack mounted under [`crate::Server::router`] (spec
//! §4.I "MountRoutes: attach common middleware (request id, real-ip, panic
//! recovery, CORS), tenancy resolver, identity extractor").
//!
//! Tenancy resolution and identity extraction are themselves pluggable —
//! see [`crate::role`] — so this module only wires the tower-http layers
//! that apply uniformly to every request, plus the extension that carries
//! the resolved [`crate::role::Role`] into handlers.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::role::RoleExtractor;

/// `x-request-id`, set by [`SetRequestIdLayer`] on the way in and echoed
/// back by [`PropagateRequestIdLayer`] on the way out.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(
        axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
        MakeRequestUuid,
    )
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(axum::http::HeaderName::from_static(REQUEST_ID_HEADER))
}

pub fn trace_layer() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

pub fn catch_panic_layer() -> CatchPanicLayer<tower_http::catch_panic::DefaultResponseForPanic> {
    CatchPanicLayer::new()
}

/// Permissive CORS, matching the teacher's own `CorsLayer::permissive()`
/// choice for its REST gateway.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

/// Resolves the caller's [`crate::role::Role`] with the configured
/// extractor and inserts it into the request extensions, so route
/// handlers can read it with `Extension<Role>` instead of re-parsing
/// headers themselves.
pub async fn role_middleware(
    axum::extract::Extension(extractor): axum::extract::Extension<Arc<dyn RoleExtractor>>,
    mut request: Request,
    next: Next,
) -> Response {
    let role = extractor.extract(request.headers());
    request.extensions_mut().insert(role);
    next.run(request).await
}

/// Best-effort client address for log correlation: prefers
/// `X-Forwarded-For`'s first hop, then `X-Real-IP`, else "unknown". Not a
/// substitute for a trusted-proxy allowlist; that policy belongs to the
/// deployment's edge proxy, not this crate.
pub fn client_address(headers: &axum::http::HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(header_str) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(header_str) {
        return real_ip.to_string();
    }
    "unknown".to_string()
}

fn header_str(value: &HeaderValue) -> Option<&str> {
    value.to_str().ok()
}
