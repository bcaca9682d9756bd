use axum::{Json, extract::Extension, http::HeaderMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::authenticate;
use crate::Gatehouse;
use crate::api::{
    extract::Client,
    response::{ApiError, ErrorBody},
};
use crate::decision::Decision;
use crate::permissions::Resource;

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct PermissionCheckRequest {
    pub action: String,
    pub subject: String,
    #[serde(default)]
    pub resource: Option<Resource>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionCheckResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/permissions/check",
    request_body = PermissionCheckRequest,
    responses(
        (status = 200, description = "Evaluation result for the caller", body = PermissionCheckResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    ),
    tag = "permissions"
)]
pub async fn check(
    headers: HeaderMap,
    gatehouse: Extension<Arc<Gatehouse>>,
    Client(client): Client,
    Json(request): Json<PermissionCheckRequest>,
) -> Result<Json<PermissionCheckResponse>, ApiError> {
    let authorized = authenticate(
        &gatehouse,
        &headers,
        client.clone(),
        ("POST", "/v1/permissions/check"),
        None,
    )
    .await?;
    let decision = gatehouse
        .permissions()
        .has_permission(
            &authorized.actor(),
            &request.action,
            &request.subject,
            request.resource.as_ref(),
            &client,
        )
        .await?;
    let response = match decision {
        Decision::Allow(()) => PermissionCheckResponse {
            allowed: true,
            reason: None,
        },
        Decision::Deny(denial) => PermissionCheckResponse {
            allowed: false,
            reason: Some(denial.reason().code().to_string()),
        },
    };
    Ok(Json(response))
}
