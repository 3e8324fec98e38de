//! Refresh token `jti` registry with rotation and reuse detection.
//!
//! Each refresh grant revokes the presented `jti` in a conditional update
//! before a replacement is issued. Presenting a `jti` that was already
//! rotated means the token leaked, so every refresh token of that
//! (user, client) pair is revoked.

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use time::OffsetDateTime;

use crate::entity::oauth2_refresh_token;
use crate::error::ProtocolError;
use crate::oauth2::tokens::RefreshTokenClaims;

#[derive(Clone, Debug)]
pub struct RefreshTokenStore {
    db: Arc<DatabaseConnection>,
}

impl RefreshTokenStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn record(&self, claims: &RefreshTokenClaims) -> Result<(), DbErr> {
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|e| DbErr::Custom(format!("invalid refresh token expiry: {e}")))?;
        oauth2_refresh_token::ActiveModel {
            jti: Set(claims.jti.clone()),
            client_id: Set(claims.client_id.clone()),
            user_id: Set(claims.sub.clone()),
            scope: Set(claims.scope.clone()),
            expires_at: Set(expires_at),
            revoked_at: Set(None),
            created_at: Set(OffsetDateTime::now_utc()),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    pub async fn find(&self, jti: &str) -> Result<Option<oauth2_refresh_token::Model>, DbErr> {
        oauth2_refresh_token::Entity::find_by_id(jti)
            .one(self.db.as_ref())
            .await
    }

    /// Spend a verified refresh token. Exactly one caller can spend a `jti`.
    pub async fn consume(&self, claims: &RefreshTokenClaims) -> Result<(), ProtocolError> {
        if self.revoke(&claims.jti).await? {
            return Ok(());
        }

        match self.find(&claims.jti).await? {
            Some(record) => {
                tracing::warn!(
                    client_id = %record.client_id,
                    user_id = %record.user_id,
                    "Refresh token reuse detected, revoking all refresh tokens for the pair"
                );
                self.revoke_for_user_client(&record.user_id, &record.client_id)
                    .await?;
                Err(ProtocolError::invalid_grant("Refresh token has been revoked"))
            }
            None => Err(ProtocolError::invalid_grant("Invalid refresh token")),
        }
    }

    /// Returns whether a live token was revoked.
    pub async fn revoke(&self, jti: &str) -> Result<bool, DbErr> {
        let result = oauth2_refresh_token::Entity::update_many()
            .col_expr(
                oauth2_refresh_token::Column::RevokedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_refresh_token::Column::Jti.eq(jti))
            .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn revoke_for_user_client(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> Result<u64, DbErr> {
        let result = oauth2_refresh_token::Entity::update_many()
            .col_expr(
                oauth2_refresh_token::Column::RevokedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_refresh_token::Column::UserId.eq(user_id))
            .filter(oauth2_refresh_token::Column::ClientId.eq(client_id))
            .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn cleanup_expired(&self) -> Result<u64, DbErr> {
        let result = oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
