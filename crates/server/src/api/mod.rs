//! HTTP surface of the identity provider.
//!
//! - `oauth2` routes - protocol endpoints and browser pages (see [`crate::oauth2`])
//! - `admin` - Client and user administration (/admin/*)
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration, served at /api-docs

pub mod admin;
pub mod auth;
pub mod health;
pub mod openapi;

pub use admin::ADMIN_TAG;
pub use health::MISC_TAG;

use crate::AppResources;
use crate::oauth2::{self, OAuth2State};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Assemble every route with its middleware.
pub fn app(app_resources: AppResources, oauth2_state: OAuth2State) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(oauth2::router(oauth2_state.clone()))
        .nest("/admin", admin::router(oauth2_state))
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(app_resources, oauth2_state))]
pub async fn start_webserver(
    app_resources: AppResources,
    oauth2_state: OAuth2State,
) -> color_eyre::Result<()> {
    let bind_address = app_resources.config.bind_address.clone();
    let router = app(app_resources, oauth2_state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(addr = %bind_address, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
