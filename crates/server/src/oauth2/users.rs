//! End-user directory backing the login page and token claims.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::entity::oauth2_user;
use crate::oauth2::secret::{hash_secret, verify_stored_secret};


#[derive(Debug, Error)]
pub enum UserError {
    #[error("a user with this email already exists")]
    EmailTaken,
    #[error("invalid user: {0}")]
    Invalid(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error(transparent)]
    Db(#[from] DbErr),
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    /// Users without a password cannot sign in at the login page
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub phone_number_verified: bool,
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone, Debug)]
pub struct UserDirectory {
    db: Arc<DatabaseConnection>,
}

impl UserDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip(self, new), fields(email = %new.email))]
    pub async fn create_user(&self, new: NewUser) -> Result<oauth2_user::Model, UserError> {
        let email = normalize_email(&new.email);
        if !email.contains('@') {
            return Err(UserError::Invalid("email address is malformed".into()));
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(UserError::EmailTaken);
        }
        let password_hash = new
            .password
            .as_deref()
            .map(hash_secret)
            .transpose()
            .map_err(|e| UserError::Hash(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let user = oauth2_user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(email),
            email_verified: Set(new.email_verified),
            password_hash: Set(password_hash),
            name: Set(new.name),
            given_name: Set(new.given_name),
            family_name: Set(new.family_name),
            picture: Set(new.picture),
            phone_number: Set(new.phone_number),
            phone_number_verified: Set(new.phone_number_verified),
            school_id: Set(new.school_id),
            role: Set(new.role),
            permissions: Set(new.permissions.join(" ")),
            created_at: Set(now),
            updated_at: Set(now),
            last_login_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn find_by_id(&self, user_id: &str) -> Result<Option<oauth2_user::Model>, DbErr> {
        oauth2_user::Entity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<oauth2_user::Model>, DbErr> {
        oauth2_user::Entity::find()
            .filter(oauth2_user::Column::Email.eq(normalize_email(email)))
            .one(self.db.as_ref())
            .await
    }

    /// Check a password. Unknown email, missing password and wrong password
    /// all yield `None`.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<oauth2_user::Model>, DbErr> {
        let user = self.find_by_email(email).await?;
        let stored = user.as_ref().and_then(|u| u.password_hash.as_deref());
        let valid = verify_stored_secret(password, stored);
        Ok(user.filter(|_| valid))
    }

    pub async fn touch_last_login(
        &self,
        user: oauth2_user::Model,
    ) -> Result<oauth2_user::Model, DbErr> {
        let mut active: oauth2_user::ActiveModel = user.into();
        active.last_login_at = Set(Some(OffsetDateTime::now_utc()));
        active.update(self.db.as_ref()).await
    }
}
