use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use super::authenticate;
use crate::Gatehouse;
use crate::api::{
    extract::Client,
    response::{ApiError, ErrorBody},
};
use crate::password::{PasswordExpirationStatus, PersonalInfo, StrengthReport};

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct StrengthRequest {
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub email: String,
    pub current_password: String,
    pub new_password: String,
}

#[utoipa::path(
    post,
    path = "/v1/password/strength",
    request_body = StrengthRequest,
    responses(
        (status = 200, description = "Every rule the password breaks", body = StrengthReport)
    ),
    tag = "password"
)]
pub async fn strength(
    gatehouse: Extension<Arc<Gatehouse>>,
    Json(request): Json<StrengthRequest>,
) -> Json<StrengthReport> {
    let info = PersonalInfo {
        name: request.name,
        email: request.email,
    };
    Json(gatehouse.passwords().validate_strength(&request.password, &info))
}

#[utoipa::path(
    post,
    path = "/v1/password/change",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Weak, reused or changed too recently", body = ErrorBody),
        (status = 401, description = "Current password is wrong", body = ErrorBody),
        (status = 403, description = "Account locked", body = ErrorBody)
    ),
    tag = "password"
)]
pub async fn change(
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    gatehouse
        .change_password(
            &request.email,
            &request.current_password,
            &request.new_password,
            &client,
        )
        .await?
        .into_result()?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/password/status",
    responses(
        (status = 200, description = "Expiration status of the caller's password", body = PasswordExpirationStatus),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    ),
    tag = "password"
)]
pub async fn status(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
) -> Result<Json<PasswordExpirationStatus>, ApiError> {
    let authorized = authenticate(
        &gatehouse,
        &headers,
        client,
        ("GET", "/v1/password/status"),
        None,
    )
    .await?;
    let status = gatehouse
        .passwords()
        .expiration_status(authorized.identity.user_id)
        .await?;
    Ok(Json(status))
}
