//! OAuth2 Consent entity - scopes a user approved for a client.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::split_list;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_consent")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    /// Space-separated list of approved scopes
    pub scope: String,
    pub granted_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn scopes_list(&self) -> Vec<String> {
        split_list(&self.scope)
    }

    /// True when every requested scope was previously approved.
    pub fn covers<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        let granted = self.scopes_list();
        requested
            .iter()
            .all(|s| granted.iter().any(|g| g == s.as_ref()))
    }
}
