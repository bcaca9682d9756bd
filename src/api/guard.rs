use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use super::{extract::Client, response};
use crate::Gatehouse;
use crate::decision::Decision;
use crate::rate_limit::RequestContext;

/// Probes stay reachable for orchestrators.
const EXEMPT_PATHS: &[&str] = &["/health"];

/// Ban check and the global `api` rule for every request.
pub(super) async fn enforce_api_limit(
    Extension(gatehouse): Extension<Arc<Gatehouse>>,
    Client(client): Client,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let context = RequestContext::new(client, request.method().as_str(), path);
    match gatehouse
        .rate_limiter()
        .check_request(&context, gatehouse.api_rule())
        .await
    {
        Decision::Allow(outcome) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            for (name, value) in outcome.headers() {
                response::insert(
                    headers,
                    axum::http::HeaderName::from_static(name),
                    &value,
                );
            }
            response
        }
        Decision::Deny(denial) => {
            debug!(reason = denial.reason().code(), "request rejected at the edge");
            response::ApiError::Denied(denial).into_response()
        }
    }
}
