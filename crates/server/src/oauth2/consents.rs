//! Per (user, client) scope grants.

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, SqlErr,
};
use time::OffsetDateTime;

use crate::entity::{oauth2_client, oauth2_consent};

#[derive(Clone, Debug)]
pub struct ConsentManager {
    db: Arc<DatabaseConnection>,
}

impl ConsentManager {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The live (unrevoked) consent for this pair, if any.
    pub async fn find(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Option<oauth2_consent::Model>, DbErr> {
        oauth2_consent::Entity::find()
            .filter(oauth2_consent::Column::UserId.eq(user_id))
            .filter(oauth2_consent::Column::ClientId.eq(client_id))
            .filter(oauth2_consent::Column::RevokedAt.is_null())
            .one(self.db.as_ref())
            .await
    }

    /// Trusted clients and clients without `require_consent` never prompt.
    /// Otherwise a prompt is needed unless a live consent covers every scope.
    pub async fn requires_consent(
        &self,
        client: &oauth2_client::Model,
        user_id: &str,
        scopes: &[String],
    ) -> Result<bool, DbErr> {
        if client.trusted || !client.require_consent {
            return Ok(false);
        }
        let existing = self.find(user_id, &client.client_id).await?;
        Ok(!existing.is_some_and(|c| c.covers(scopes)))
    }

    /// Record approval of `scopes`. A live grant is widened to the union,
    /// never narrowed; a revoked one starts over from `scopes`.
    ///
    /// Each (user, client) pair owns at most one row.
    pub async fn grant(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
    ) -> Result<oauth2_consent::Model, DbErr> {
        let now = OffsetDateTime::now_utc();
        let model = match self.find_any(user_id, client_id).await? {
            Some(existing) => self.renew(existing, scopes, now).await?,
            None => match self.insert(user_id, client_id, scopes, now).await {
                Ok(model) => model,
                // A concurrent grant created the row first
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    let existing = self.find_any(user_id, client_id).await?.ok_or(e)?;
                    self.renew(existing, scopes, now).await?
                }
                Err(e) => return Err(e),
            },
        };
        tracing::info!(user_id, client_id, scope = %model.scope, "Consent granted");
        Ok(model)
    }

    async fn find_any(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Option<oauth2_consent::Model>, DbErr> {
        oauth2_consent::Entity::find()
            .filter(oauth2_consent::Column::UserId.eq(user_id))
            .filter(oauth2_consent::Column::ClientId.eq(client_id))
            .one(self.db.as_ref())
            .await
    }

    async fn insert(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        now: OffsetDateTime,
    ) -> Result<oauth2_consent::Model, DbErr> {
        oauth2_consent::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            client_id: Set(client_id.to_string()),
            scope: Set(dedup(Vec::new(), scopes).join(" ")),
            granted_at: Set(now),
            revoked_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
    }

    async fn renew(
        &self,
        existing: oauth2_consent::Model,
        scopes: &[String],
        now: OffsetDateTime,
    ) -> Result<oauth2_consent::Model, DbErr> {
        let base = if existing.revoked_at.is_some() {
            Vec::new()
        } else {
            existing.scopes_list()
        };
        let mut active: oauth2_consent::ActiveModel = existing.into();
        active.scope = Set(dedup(base, scopes).join(" "));
        active.granted_at = Set(now);
        active.revoked_at = Set(None);
        active.update(self.db.as_ref()).await
    }

    /// Returns whether a live consent was revoked.
    pub async fn revoke(&self, user_id: &str, client_id: &str) -> Result<bool, DbErr> {
        let result = oauth2_consent::Entity::update_many()
            .col_expr(
                oauth2_consent::Column::RevokedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_consent::Column::UserId.eq(user_id))
            .filter(oauth2_consent::Column::ClientId.eq(client_id))
            .filter(oauth2_consent::Column::RevokedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            tracing::info!(user_id, client_id, "Consent revoked");
        }
        Ok(result.rows_affected > 0)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<oauth2_consent::Model>, DbErr> {
        oauth2_consent::Entity::find()
            .filter(oauth2_consent::Column::UserId.eq(user_id))
            .filter(oauth2_consent::Column::RevokedAt.is_null())
            .order_by_asc(oauth2_consent::Column::GrantedAt)
            .all(self.db.as_ref())
            .await
    }
}

/// Append `scopes` to `base`, keeping first occurrences only.
fn dedup(mut base: Vec<String>, scopes: &[String]) -> Vec<String> {
    for scope in scopes {
        if !base.contains(scope) {
            base.push(scope.clone());
        }
    }
    base
}
