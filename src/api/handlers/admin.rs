//! Administrative endpoints.
//!
//! Every handler requires `manage` on its subject; elevated roles pass without
//! a permission lookup.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::authenticate;
use crate::Gatehouse;
use crate::api::{
    extract::Client,
    response::{ApiError, ErrorBody},
};
use crate::error::Error;
use crate::permissions::ACTION_MANAGE;
use crate::rate_limit::BanRecord;

const SUBJECT_USERS: &str = "users";
const SUBJECT_BANS: &str = "bans";
/// Ten years; longer bans should be permanent.
pub const MAX_BAN_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct UnlockRequest {
    pub email: String,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub user_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PasswordResetResponse {
    pub user_id: Uuid,
    pub temporary_password: String,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct BanRequest {
    pub ip: String,
    pub reason: String,
    /// Omit for a permanent ban; otherwise between 1 and ten years.
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

#[utoipa::path(
    post,
    path = "/v1/admin/unlock",
    request_body = UnlockRequest,
    responses(
        (status = 204, description = "Account unlocked"),
        (status = 403, description = "Caller may not manage users", body = ErrorBody),
        (status = 404, description = "No such account", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn unlock(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<UnlockRequest>,
) -> Result<StatusCode, ApiError> {
    authenticate(
        &gatehouse,
        &headers,
        client.clone(),
        ("POST", "/v1/admin/unlock"),
        Some((ACTION_MANAGE, SUBJECT_USERS)),
    )
    .await?;
    if gatehouse
        .lockout()
        .unlock_account(&request.email, &client)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Temporary password issued; a change is required at next login", body = PasswordResetResponse),
        (status = 403, description = "Caller may not manage users", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn password_reset(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<PasswordResetResponse>, ApiError> {
    authenticate(
        &gatehouse,
        &headers,
        client.clone(),
        ("POST", "/v1/admin/password-reset"),
        Some((ACTION_MANAGE, SUBJECT_USERS)),
    )
    .await?;
    let temporary = gatehouse
        .passwords()
        .admin_reset_password(request.user_id, &client)
        .await?;
    Ok(Json(PasswordResetResponse {
        user_id: request.user_id,
        temporary_password: temporary.expose_secret().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/bans",
    request_body = BanRequest,
    responses(
        (status = 201, description = "Address banned", body = BanRecord),
        (status = 400, description = "Duration out of range", body = ErrorBody),
        (status = 403, description = "Caller may not manage bans", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn create_ban(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<BanRequest>,
) -> Result<(StatusCode, Json<BanRecord>), ApiError> {
    authenticate(
        &gatehouse,
        &headers,
        client.clone(),
        ("POST", "/v1/admin/bans"),
        Some((ACTION_MANAGE, SUBJECT_BANS)),
    )
    .await?;
    let duration = ban_duration(request.duration_seconds)?;
    let record = gatehouse
        .rate_limiter()
        .ban_ip(request.ip.trim(), &request.reason, duration, &client)
        .await
        .map_err(Error::from)?;
    info!(ip = %record.ip, "address banned by administrator");
    Ok((StatusCode::CREATED, Json(record)))
}

fn ban_duration(seconds: Option<u64>) -> Result<Option<Duration>, ApiError> {
    match seconds {
        None => Ok(None),
        Some(seconds @ 1..=MAX_BAN_SECONDS) => Ok(Some(Duration::from_secs(seconds))),
        Some(_) => Err(ApiError::BadRequest(format!(
            "duration_seconds must be between 1 and {MAX_BAN_SECONDS}"
        ))),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/bans",
    responses(
        (status = 200, description = "Active bans", body = [BanRecord]),
        (status = 403, description = "Caller may not manage bans", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_bans(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
) -> Result<Json<Vec<BanRecord>>, ApiError> {
    authenticate(
        &gatehouse,
        &headers,
        client,
        ("GET", "/v1/admin/bans"),
        Some((ACTION_MANAGE, SUBJECT_BANS)),
    )
    .await?;
    let bans = gatehouse
        .rate_limiter()
        .list_bans()
        .await
        .map_err(Error::from)?;
    Ok(Json(bans))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/bans/{ip}",
    params(
        ("ip" = String, Path, description = "Banned address")
    ),
    responses(
        (status = 204, description = "Ban lifted"),
        (status = 403, description = "Caller may not manage bans", body = ErrorBody),
        (status = 404, description = "Address was not banned", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_ban(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Path(ip): Path<String>,
) -> Result<StatusCode, ApiError> {
    authenticate(
        &gatehouse,
        &headers,
        client.clone(),
        ("DELETE", "/v1/admin/bans/{ip}"),
        Some((ACTION_MANAGE, SUBJECT_BANS)),
    )
    .await?;
    let removed = gatehouse
        .rate_limiter()
        .unban_ip(&ip, &client)
        .await
        .map_err(Error::from)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}
