//! Authorization code issuance and single-use consumption.
//!
//! A code moves `Issued -> Consumed` exactly once. The transition is a
//! conditional `UPDATE ... WHERE used_at IS NULL`; whichever request sees
//! `rows_affected == 1` wins, every other presenter gets `invalid_grant`.

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use time::{Duration, OffsetDateTime};

use crate::entity::oauth2_authorization::{self, CodeState};
use crate::error::ProtocolError;
use crate::oauth2::pkce::{PkceChallenge, validate_pkce_token_params};
use crate::oauth2::secret::generate_token;

/// Everything bound to a code at the authorize step.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub pkce: Option<PkceChallenge>,
    pub auth_time: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct AuthorizationCodeStore {
    db: Arc<DatabaseConnection>,
    lifetime: Duration,
}

impl AuthorizationCodeStore {
    pub fn new(db: Arc<DatabaseConnection>, lifetime_secs: i64) -> Self {
        Self {
            db,
            lifetime: Duration::seconds(lifetime_secs),
        }
    }

    /// Persist a fresh code and return its value.
    pub async fn create(&self, new: NewAuthorizationCode) -> Result<String, DbErr> {
        let code = generate_token();
        let now = OffsetDateTime::now_utc();
        let (code_challenge, code_challenge_method) = match new.pkce {
            Some(pkce) => (Some(pkce.challenge), Some(pkce.method.as_str().to_string())),
            None => (None, None),
        };

        oauth2_authorization::ActiveModel {
            code: Set(code.clone()),
            client_id: Set(new.client_id.clone()),
            user_id: Set(new.user_id.clone()),
            redirect_uri: Set(new.redirect_uri),
            scope: Set(new.scopes.join(" ")),
            nonce: Set(new.nonce),
            code_challenge: Set(code_challenge),
            code_challenge_method: Set(code_challenge_method),
            auth_time: Set(new.auth_time),
            expires_at: Set(now + self.lifetime),
            used_at: Set(None),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            client_id = %new.client_id,
            user_id = %new.user_id,
            "Authorization code issued"
        );
        Ok(code)
    }

    /// Check every binding of `code` and mark it used.
    ///
    /// PKCE is verified before the conditional update, so a wrong verifier
    /// leaves the code unconsumed for the legitimate holder.
    pub async fn validate_and_consume(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<oauth2_authorization::Model, ProtocolError> {
        let Some(record) = oauth2_authorization::Entity::find_by_id(code)
            .one(self.db.as_ref())
            .await?
        else {
            tracing::warn!(client_id, "Unknown authorization code presented");
            return Err(ProtocolError::invalid_grant("Invalid authorization code"));
        };

        let now = OffsetDateTime::now_utc();
        match record.state_at(now) {
            CodeState::Issued => {}
            CodeState::Consumed => {
                tracing::warn!(client_id, "Authorization code replay rejected");
                return Err(ProtocolError::invalid_grant("Invalid authorization code"));
            }
            CodeState::Expired => {
                return Err(ProtocolError::invalid_grant("Authorization code expired"));
            }
        }
        if record.client_id != client_id {
            tracing::warn!(
                client_id,
                bound_client_id = %record.client_id,
                "Authorization code presented by a different client"
            );
            return Err(ProtocolError::invalid_grant("Client mismatch"));
        }
        if record.redirect_uri != redirect_uri {
            return Err(ProtocolError::invalid_grant("Redirect URI mismatch"));
        }

        if let Err(e) = validate_pkce_token_params(
            code_verifier,
            record.code_challenge.as_deref(),
            record.code_challenge_method.as_deref(),
        ) {
            tracing::warn!(client_id, "PKCE verification failed at code exchange");
            return Err(e);
        }

        let result = oauth2_authorization::Entity::update_many()
            .col_expr(oauth2_authorization::Column::UsedAt, Expr::value(now))
            .filter(oauth2_authorization::Column::Code.eq(code))
            .filter(oauth2_authorization::Column::UsedAt.is_null())
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected != 1 {
            tracing::warn!(client_id, "Authorization code replay rejected");
            return Err(ProtocolError::invalid_grant("Invalid authorization code"));
        }

        tracing::info!(client_id, user_id = %record.user_id, "Authorization code consumed");
        Ok(oauth2_authorization::Model {
            used_at: Some(now),
            ..record
        })
    }

    /// Delete codes past expiry. Returns the number removed.
    pub async fn cleanup_expired(&self) -> Result<u64, DbErr> {
        let result = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
