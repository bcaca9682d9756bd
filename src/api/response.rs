//! Mapping from decisions and errors to HTTP responses.

use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::decision::{Denial, DenyKind, DenyReason};
use crate::error::Error;

/// Body returned for every non-2xx response.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            errors: Vec::new(),
            retry_after: None,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Denied(Denial),
    /// The request parsed but a field is out of range.
    BadRequest(String),
    NotFound,
    Internal(Error),
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        Self::Denied(denial)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownUser(_) => Self::NotFound,
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Denied(denial) => denied(&denial),
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new(message, "invalid_request")),
            )
                .into_response(),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody::new("Not found", "not_found")),
            )
                .into_response(),
            Self::Internal(err) => {
                error!("request failed: {err}");
                internal_error()
            }
        }
    }
}

pub(crate) fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("Internal server error", "internal_error")),
    )
        .into_response()
}

/// Authentication and authorization denials only expose a generic code; the
/// specific reason stays in logs and audit.
fn public_code(reason: &DenyReason) -> &'static str {
    match reason.kind() {
        DenyKind::Authentication if *reason == DenyReason::InvalidCredentials => {
            "invalid_credentials"
        }
        DenyKind::Authentication => "unauthorized",
        DenyKind::Authorization => match reason {
            DenyReason::AccountLocked { .. } => "account_locked",
            DenyReason::EmailVerificationRequired => "email_verification_required",
            _ => "forbidden",
        },
        DenyKind::RateAbuse | DenyKind::Policy => reason.code(),
        DenyKind::Infrastructure => "internal_error",
    }
}

pub(crate) fn denied(denial: &Denial) -> Response {
    let reason = denial.reason();
    let mut body = ErrorBody::new(reason.public_message(), public_code(reason));
    body.retry_after = reason.retry_after();
    if let DenyReason::WeakPassword { errors } = reason {
        body.errors.clone_from(errors);
    }

    let mut headers = HeaderMap::new();
    if let Some(retry_after) = body.retry_after {
        insert(&mut headers, header::RETRY_AFTER, &retry_after.to_string());
    }
    if let DenyReason::RateLimited {
        limit, reset_at, ..
    } = reason
    {
        let remaining = denial
            .details()
            .get("remaining")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        insert(
            &mut headers,
            HeaderName::from_static("x-ratelimit-limit"),
            &limit.to_string(),
        );
        insert(
            &mut headers,
            HeaderName::from_static("x-ratelimit-remaining"),
            &remaining.to_string(),
        );
        insert(
            &mut headers,
            HeaderName::from_static("x-ratelimit-reset"),
            &reset_at.timestamp().to_string(),
        );
    }
    if reason.kind() == DenyKind::Authentication {
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }

    (denial.status(), headers, Json(body)).into_response()
}

pub(crate) fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
