//! OAuth2 Authorization Code entity - single-use codes exchanged for tokens.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::split_list;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_authorization")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// OpenID Connect nonce
    pub nonce: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (S256 or plain)
    pub code_challenge_method: Option<String>,
    /// When the user authenticated at the IdP
    pub auth_time: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Set exactly once, when the code is exchanged
    pub used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle of an authorization code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    Issued,
    Consumed,
    Expired,
}

impl Model {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn state_at(&self, now: OffsetDateTime) -> CodeState {
        if self.used_at.is_some() {
            CodeState::Consumed
        } else if self.is_expired_at(now) {
            CodeState::Expired
        } else {
            CodeState::Issued
        }
    }

    pub fn scopes_list(&self) -> Vec<String> {
        split_list(&self.scope)
    }
}
