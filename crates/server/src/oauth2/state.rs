//! Shared state handed to every OAuth2 handler.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::OAuth2Config;
use crate::oauth2::clients::ClientRegistry;
use crate::oauth2::codes::AuthorizationCodeStore;
use crate::oauth2::consents::ConsentManager;
use crate::oauth2::keys::SigningKey;
use crate::oauth2::refresh::RefreshTokenStore;
use crate::oauth2::sessions::SessionManager;
use crate::oauth2::tokens::{TokenManager, TokenSettings};
use crate::oauth2::users::UserDirectory;

/// Explicit context built once at startup; cloning is cheap.
#[derive(Clone, Debug)]
pub struct OAuth2State {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<OAuth2Config>,
    pub clients: ClientRegistry,
    pub codes: AuthorizationCodeStore,
    pub consents: ConsentManager,
    pub sessions: SessionManager,
    pub refresh_tokens: RefreshTokenStore,
    pub users: UserDirectory,
    pub tokens: TokenManager,
}

impl OAuth2State {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &OAuth2Config,
        signing_key: Arc<SigningKey>,
    ) -> Self {
        Self {
            clients: ClientRegistry::new(db.clone()),
            codes: AuthorizationCodeStore::new(db.clone(), config.authorization_code_lifetime),
            consents: ConsentManager::new(db.clone()),
            sessions: SessionManager::new(db.clone(), config.session_lifetime),
            refresh_tokens: RefreshTokenStore::new(db.clone()),
            users: UserDirectory::new(db.clone()),
            tokens: TokenManager::new(signing_key, TokenSettings::from(config)),
            config: Arc::new(config.clone()),
            db,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer_url
    }

    /// Absolute URL of an endpoint under the issuer.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.issuer_url, path)
    }

    /// One sweep of expired codes, sessions and refresh-token records.
    pub async fn cleanup_expired(&self) -> Result<(), sea_orm::DbErr> {
        let codes = self.codes.cleanup_expired().await?;
        let sessions = self.sessions.cleanup_expired().await?;
        let refresh_tokens = self.refresh_tokens.cleanup_expired().await?;
        if codes + sessions + refresh_tokens > 0 {
            tracing::debug!(codes, sessions, refresh_tokens, "Expired OAuth2 state removed");
        }
        Ok(())
    }
}
