//! IdP browser sessions and the Relying Parties signed in through them.

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter,
};
use time::{Duration, OffsetDateTime};

use crate::entity::{oauth2_session, oauth2_session_client};
use crate::oauth2::secret::generate_token;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "idp_session";

#[derive(Clone, Debug)]
pub struct SessionManager {
    db: Arc<DatabaseConnection>,
    lifetime: Duration,
}

impl SessionManager {
    pub fn new(db: Arc<DatabaseConnection>, lifetime_secs: i64) -> Self {
        Self {
            db,
            lifetime: Duration::seconds(lifetime_secs),
        }
    }

    pub async fn create(&self, user_id: &str) -> Result<oauth2_session::Model, DbErr> {
        let now = OffsetDateTime::now_utc();
        let session = oauth2_session::ActiveModel {
            id: Set(generate_token()),
            user_id: Set(user_id.to_string()),
            csrf_token: Set(generate_token()),
            auth_time: Set(now),
            expires_at: Set(now + self.lifetime),
            terminated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await?;
        tracing::info!(user_id, "IdP session started");
        Ok(session)
    }

    /// The session behind `session_id` if it is neither expired nor terminated.
    pub async fn get_active(
        &self,
        session_id: &str,
    ) -> Result<Option<oauth2_session::Model>, DbErr> {
        let now = OffsetDateTime::now_utc();
        Ok(oauth2_session::Entity::find_by_id(session_id)
            .one(self.db.as_ref())
            .await?
            .filter(|s| s.is_active_at(now)))
    }

    /// Remember that `client_id` received a code through this session.
    pub async fn link_client(&self, session_id: &str, client_id: &str) -> Result<(), DbErr> {
        let linked = oauth2_session_client::Entity::find()
            .filter(oauth2_session_client::Column::SessionId.eq(session_id))
            .filter(oauth2_session_client::Column::ClientId.eq(client_id))
            .one(self.db.as_ref())
            .await?;
        if linked.is_none() {
            oauth2_session_client::ActiveModel {
                id: Set(uuid::Uuid::new_v4().to_string()),
                session_id: Set(session_id.to_string()),
                client_id: Set(client_id.to_string()),
                created_at: Set(OffsetDateTime::now_utc()),
            }
            .insert(self.db.as_ref())
            .await?;
        }
        Ok(())
    }

    /// Client ids of the Relying Parties linked to a session.
    pub async fn rp_clients(&self, session_id: &str) -> Result<Vec<String>, DbErr> {
        Ok(oauth2_session_client::Entity::find()
            .filter(oauth2_session_client::Column::SessionId.eq(session_id))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|link| link.client_id)
            .collect())
    }

    /// End one session and drop its RP links. Returns whether it was live.
    pub async fn terminate(&self, session_id: &str) -> Result<bool, DbErr> {
        let result = oauth2_session::Entity::update_many()
            .col_expr(
                oauth2_session::Column::TerminatedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_session::Column::Id.eq(session_id))
            .filter(oauth2_session::Column::TerminatedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        oauth2_session_client::Entity::delete_many()
            .filter(oauth2_session_client::Column::SessionId.eq(session_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Global logout: end every live session of `user_id`. Returns the count.
    pub async fn terminate_all_for_user(&self, user_id: &str) -> Result<u64, DbErr> {
        let sessions = oauth2_session::Entity::find()
            .filter(oauth2_session::Column::UserId.eq(user_id))
            .filter(oauth2_session::Column::TerminatedAt.is_null())
            .all(self.db.as_ref())
            .await?;
        let ids: Vec<String> = sessions.into_iter().map(|s| s.id).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let result = oauth2_session::Entity::update_many()
            .col_expr(
                oauth2_session::Column::TerminatedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_session::Column::Id.is_in(ids.clone()))
            .filter(oauth2_session::Column::TerminatedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        oauth2_session_client::Entity::delete_many()
            .filter(oauth2_session_client::Column::SessionId.is_in(ids))
            .exec(self.db.as_ref())
            .await?;

        tracing::info!(user_id, sessions = result.rows_affected, "All sessions terminated");
        Ok(result.rows_affected)
    }

    /// Delete sessions that expired or were terminated, with their RP links.
    pub async fn cleanup_expired(&self) -> Result<u64, DbErr> {
        let stale = Condition::any()
            .add(oauth2_session::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .add(oauth2_session::Column::TerminatedAt.is_not_null());
        let ids: Vec<String> = oauth2_session::Entity::find()
            .filter(stale)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        oauth2_session_client::Entity::delete_many()
            .filter(oauth2_session_client::Column::SessionId.is_in(ids.clone()))
            .exec(self.db.as_ref())
            .await?;
        let result = oauth2_session::Entity::delete_many()
            .filter(oauth2_session::Column::Id.is_in(ids))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
