use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// OAuth2 / OpenID Connect protocol error.
///
/// Expected client mistakes are values of this type, never panics. `Server`
/// carries internal detail that is logged and never sent to the client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client")]
    InvalidClient,
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("insufficient_scope: {0}")]
    InsufficientScope(String),
    #[error("access_denied: {0}")]
    AccessDenied(String),
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported_grant_type")]
    UnsupportedGrantType,
    #[error("unsupported_response_type")]
    UnsupportedResponseType,
    #[error("login_required")]
    LoginRequired,
    #[error("consent_required")]
    ConsentRequired,
    #[error("server_error: {0}")]
    Server(String),
}

/// JSON error body defined by RFC 6749 section 5.2.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ProtocolError {
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::InvalidToken(description.into())
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::InvalidScope(description.into())
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::AccessDenied(description.into())
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::UnauthorizedClient(description.into())
    }

    pub fn server(detail: impl Into<String>) -> Self {
        Self::Server(detail.into())
    }

    /// The OAuth2 `error` code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidToken(_) => "invalid_token",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::AccessDenied(_) => "access_denied",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::LoginRequired => "login_required",
            Self::ConsentRequired => "consent_required",
            Self::Server(_) => "server_error",
        }
    }

    /// The client-facing `error_description`. Internal detail is withheld.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidGrant(d)
            | Self::InvalidToken(d)
            | Self::InvalidScope(d)
            | Self::InsufficientScope(d)
            | Self::AccessDenied(d)
            | Self::UnauthorizedClient(d) => Some(d.clone()),
            Self::InvalidClient => Some("Client authentication failed".to_string()),
            Self::UnsupportedGrantType => Some("Unsupported grant_type".to_string()),
            Self::UnsupportedResponseType => {
                Some("Only 'code' response type is supported".to_string())
            }
            Self::LoginRequired => Some("User is not authenticated".to_string()),
            Self::ConsentRequired => Some("User consent is required".to_string()),
            Self::Server(_) => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope(_) | Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            error_description: self.description(),
        }
    }
}

impl From<sea_orm::DbErr> for ProtocolError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Server(format!("database error: {e}"))
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        if let Self::Server(detail) = &self {
            tracing::error!(detail = %detail, "Internal error while handling OAuth2 request");
        }
        let mut response = (self.status(), Json(self.body())).into_response();
        let challenge = match &self {
            Self::InvalidToken(_) => Some(HeaderValue::from_static(
                r#"Bearer error="invalid_token""#,
            )),
            Self::InsufficientScope(_) => Some(HeaderValue::from_static(
                r#"Bearer error="insufficient_scope""#,
            )),
            Self::InvalidClient => Some(HeaderValue::from_static(r#"Basic realm="oauth2""#)),
            _ => None,
        };
        if let Some(value) = challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}
