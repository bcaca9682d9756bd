//! Login, refresh, logout and token introspection.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use super::authenticate;
use crate::Gatehouse;
use crate::api::{
    extract::Client,
    response::{ApiError, ErrorBody},
};
use crate::decision::{Denial, DenyReason};
use crate::gatehouse::LoginSuccess;
use crate::token::{TokenPair, clear_token_cookie, extract_token, token_cookie};

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenInfo {
    pub subject_id: Uuid,
    pub email: String,
    pub role: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated; access token also set as a cookie", body = LoginSuccess),
        (status = 401, description = "Invalid email or password", body = ErrorBody),
        (status = 403, description = "Account locked, email unverified or password expired", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let success = gatehouse
        .login(&request.email, &request.password, &client)
        .await?
        .into_result()?;
    let mut headers = HeaderMap::new();
    match token_cookie(gatehouse.tokens().config(), &success.tokens.access_token) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => warn!("Failed to build token cookie: {err}"),
    }
    Ok((StatusCode::OK, headers, Json(success)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, revoked or replayed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<RefreshRequest>,
) -> Result<Response, ApiError> {
    let pair = gatehouse
        .refresh(&request.refresh_token, &client)
        .await?
        .into_result()?;
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = token_cookie(gatehouse.tokens().config(), &pair.access_token) {
        headers.insert(SET_COOKIE, cookie);
    }
    Ok((StatusCode::OK, headers, Json(pair)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Tokens revoked and cookie cleared"),
        (status = 401, description = "No access token presented", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<LogoutRequest>,
) -> Result<Response, ApiError> {
    let config = gatehouse.tokens().config();
    let Some(access_token) = extract_token(&headers, config.cookie_name()) else {
        return Err(Denial::new(DenyReason::MissingToken).into());
    };
    gatehouse
        .logout(&access_token, request.refresh_token.as_deref(), &client)
        .await?;

    // Always clear the cookie, even if the token was already revoked.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_token_cookie(config) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/token",
    responses(
        (status = 200, description = "The presented token is valid", body = TokenInfo),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn token(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
) -> Result<Json<TokenInfo>, ApiError> {
    let authorized = authenticate(
        &gatehouse,
        &headers,
        client,
        ("GET", "/v1/auth/token"),
        None,
    )
    .await?;
    let token = authorized.token;
    Ok(Json(TokenInfo {
        subject_id: token.subject_id,
        email: token.email,
        role: token.role,
        token_type: token.token_type.as_str().to_string(),
        expires_at: token.expires_at,
    }))
}
