//! IdP browser session entity (cookie-bound).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_session")]
pub struct Model {
    /// Opaque session identifier stored in the session cookie
    #[sea_orm(primary_key, auto_increment = false)]
    #[serde(skip_serializing)]
    pub id: String,
    pub user_id: String,
    /// Anti-CSRF token for forms rendered inside this session
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub auth_time: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub terminated_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::oauth2_session_client::Entity")]
    Clients,
}

impl Related<super::oauth2_session_client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Clients.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.terminated_at.is_none() && self.expires_at > now
    }
}
