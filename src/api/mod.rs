//! HTTP surface over [`Gatehouse`].
//!
//! ## Flow Overview
//! 1) Every request gets an `x-request-id` (ULID) and a trace span.
//! 2) A global middleware rejects banned addresses and applies the `api`
//!    rate-limit rule, adding the `X-RateLimit-*` headers to the response.
//! 3) Handlers call into the core and map `Decision::Deny` and `Error` to
//!    status codes in `response`.

use anyhow::Result;
use axum::{
    Extension, Json, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::get,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;

use crate::Gatehouse;

mod extract;
mod guard;
pub mod handlers;
mod openapi;
pub mod response;

pub use extract::Client;
pub use openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// The application router: documented routes, `/openapi.json` and the global
/// rate-limit middleware.
#[must_use]
pub fn router(gatehouse: Arc<Gatehouse>) -> Router {
    let (router, _openapi) = openapi::api_router().split_for_parts();
    router
        .route("/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(guard::enforce_api_limit))
        .layer(Extension(gatehouse))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// Bind and serve until Ctrl-C.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(port: u16, gatehouse: Arc<Gatehouse>) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any);

    let app = router(gatehouse).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
