//! HTTP API handlers and routing.

pub mod error;
mod health;
pub mod request_context;
pub mod tokens;
mod v1;

use axum::{
    http::{header, HeaderName, Method, Request},
    Router,
};
use campus_id::RequestId;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Stamps each request with a `req_` ULID unless the caller sent one.
#[derive(Debug, Clone, Copy, Default)]
struct MakeUlidRequestId;

impl MakeRequestId for MakeUlidRequestId {
    fn make_request_id<B>(
        &mut self,
        _request: &Request<B>,
    ) -> Option<tower_http::request_id::RequestId> {
        RequestId::new()
            .to_string()
            .parse()
            .ok()
            .map(tower_http::request_id::RequestId::new)
    }
}

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    let request_id_header = HeaderName::from_static(request_context::REQUEST_ID_HEADER);

    Router::new()
        .merge(health::routes())
        .nest("/v1", v1::routes())
        // Layers run bottom-up: the ID is set before tracing sees the request.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeUlidRequestId))
        .layer(cors)
        .with_state(state)
}
