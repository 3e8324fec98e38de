//! Bearer authentication for the administrative API.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::AppResources;
use crate::oauth2::secret::constant_time_eq;

/// Error body returned by the admin API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminError {
    /// Error code (e.g., "unauthorized", "not_found")
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl AdminError {
    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self {
            error: "unauthorized".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self {
            error: "not_found".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self {
            error: "bad_request".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn conflict(description: impl Into<String>) -> Self {
        Self {
            error: "conflict".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn server_error() -> Self {
        Self {
            error: "server_error".to_string(),
            error_description: None,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<sea_orm::DbErr> for AdminError {
    fn from(e: sea_orm::DbErr) -> Self {
        tracing::error!("Database error in admin API: {}", e);
        Self::server_error()
    }
}

/// Axum extractor guarding the admin API.
///
/// Expects `Authorization: Bearer <admin_api_key>`; the key is compared in
/// constant time against the configured value.
#[derive(Debug)]
pub struct AdminAuth;

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
{
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resources = parts.extensions.get::<AppResources>().ok_or_else(|| {
            tracing::error!("AppResources not found in extensions");
            AdminError::server_error()
        })?;

        let presented = match parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(value) => value.strip_prefix("Bearer ").ok_or_else(|| {
                AdminError::unauthorized("Authorization header must use Bearer scheme")
            })?,
            None => return Err(AdminError::unauthorized("Missing Authorization header")),
        };

        if !constant_time_eq(presented, &resources.config.admin_api_key) {
            tracing::warn!("Rejected admin API request with invalid key");
            return Err(AdminError::unauthorized("Invalid admin API key"));
        }
        Ok(AdminAuth)
    }
}
