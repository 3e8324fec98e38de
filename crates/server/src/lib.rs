//! A multi-tenant OpenID Connect identity provider.
//!
//! Issues authorization codes bound to PKCE challenges, mints RS256-signed ID,
//! access and refresh tokens, and tracks consent, browser sessions and
//! registered Relying Parties in a SQL database.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}
