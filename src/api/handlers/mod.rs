pub mod admin;
pub mod auth;
pub mod health;
pub mod password;
pub mod permissions;

use axum::http::HeaderMap;

use super::response::ApiError;
use crate::Gatehouse;
use crate::audit::ClientInfo;
use crate::gatehouse::{AccessRequest, Authorized};
use crate::rate_limit::RequestContext;
use crate::token::extract_token;

/// Run the request pipeline for a handler, optionally requiring a permission.
///
/// The global `api` rule has already been applied by the middleware, so no
/// extra rule is set here.
pub(crate) async fn authenticate(
    gatehouse: &Gatehouse,
    headers: &HeaderMap,
    client: ClientInfo,
    route: (&str, &str),
    permission: Option<(&str, &str)>,
) -> Result<Authorized, ApiError> {
    let (method, path) = route;
    let token = extract_token(headers, gatehouse.tokens().config().cookie_name());
    let mut request = AccessRequest::new(RequestContext::new(client, method, path), token);
    if let Some((action, subject)) = permission {
        request = request.permission(action, subject);
    }
    Ok(gatehouse.authorize(&request).await?.into_result()?)
}
