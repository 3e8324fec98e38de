//! Health check endpoint.

use axum::{Extension, http::StatusCode};

use crate::AppResources;

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Health check endpoint.
#[tracing::instrument(skip(resources))]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Returns `ok` when the service is accepting requests and the database answers a ping.\n\n\
                   Supports both GET and HEAD methods for compatibility with load balancers and \
                   Kubernetes probes.",
    responses(
        (status = 200, description = "Service is healthy", body = str, content_type = "text/plain", example = "ok"),
        (status = 503, description = "Database unreachable", body = str, content_type = "text/plain", example = "database unavailable")
    )
)]
pub async fn health(Extension(resources): Extension<AppResources>) -> (StatusCode, &'static str) {
    match resources.db.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!("Health check database ping failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
