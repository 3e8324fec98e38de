//! Registered Relying Parties: CRUD, secret lifecycle and credential checks.
//!
//! The plaintext client secret exists only in the return value of
//! [`ClientRegistry::create`] and [`ClientRegistry::rotate_secret`]; only its
//! PBKDF2 hash is persisted and no read path exposes either.

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::entity::{
    oauth2_authorization, oauth2_client, oauth2_consent, oauth2_refresh_token,
    oauth2_session_client,
};
use crate::oauth2::claims::{SCOPE_OPENID, SCOPE_PROFILE};
use crate::oauth2::secret::{generate_client_secret, hash_secret, verify_stored_secret};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const RESPONSE_TYPE_CODE: &str = "code";

pub const SUPPORTED_GRANT_TYPES: &[&str] = &[GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN];
pub const SUPPORTED_RESPONSE_TYPES: &[&str] = &[RESPONSE_TYPE_CODE];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("client not found")]
    NotFound,
    #[error("public clients have no secret")]
    PublicClient,
    #[error("invalid client configuration: {0}")]
    Invalid(String),
    #[error("failed to hash client secret: {0}")]
    Hash(String),
    #[error(transparent)]
    Db(#[from] DbErr),
}

fn default_scopes() -> Vec<String> {
    vec![SCOPE_OPENID.to_string(), SCOPE_PROFILE.to_string()]
}

fn default_grant_types() -> Vec<String> {
    vec![GRANT_AUTHORIZATION_CODE.to_string()]
}

fn default_response_types() -> Vec<String> {
    vec![RESPONSE_TYPE_CODE.to_string()]
}

fn default_true() -> bool {
    true
}

/// Registration request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewClient {
    pub name: String,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub access_token_lifetime: Option<i64>,
    #[serde(default)]
    pub refresh_token_lifetime: Option<i64>,
    #[serde(default)]
    pub id_token_lifetime: Option<i64>,
    #[serde(default)]
    pub require_pkce: bool,
    #[serde(default = "default_true")]
    pub require_consent: bool,
    #[serde(default)]
    pub trusted: bool,
    #[serde(default = "default_true")]
    pub is_confidential: bool,
}

impl NewClient {
    /// Confidential client with default capabilities.
    pub fn new(name: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            name: name.into(),
            redirect_uris,
            post_logout_redirect_uris: Vec::new(),
            scopes: default_scopes(),
            grant_types: default_grant_types(),
            response_types: default_response_types(),
            access_token_lifetime: None,
            refresh_token_lifetime: None,
            id_token_lifetime: None,
            require_pkce: false,
            require_consent: true,
            trusted: false,
            is_confidential: true,
        }
    }
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub post_logout_redirect_uris: Option<Vec<String>>,
    pub scopes: Option<Vec<String>>,
    pub grant_types: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
    pub access_token_lifetime: Option<i64>,
    pub refresh_token_lifetime: Option<i64>,
    pub id_token_lifetime: Option<i64>,
    pub require_pkce: Option<bool>,
    pub require_consent: Option<bool>,
    pub trusted: Option<bool>,
}

/// Read view of a client. Never carries the secret or its hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClientInfo {
    pub client_id: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub access_token_lifetime: Option<i64>,
    pub refresh_token_lifetime: Option<i64>,
    pub id_token_lifetime: Option<i64>,
    pub require_pkce: bool,
    pub require_consent: bool,
    pub trusted: bool,
    pub is_confidential: bool,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<oauth2_client::Model> for ClientInfo {
    fn from(m: oauth2_client::Model) -> Self {
        Self {
            redirect_uris: m.redirect_uris_list(),
            post_logout_redirect_uris: m.post_logout_redirect_uris_list(),
            scopes: m.scopes_list(),
            grant_types: m.grant_types_list(),
            response_types: m.response_types_list(),
            client_id: m.client_id,
            name: m.name,
            access_token_lifetime: m.access_token_lifetime,
            refresh_token_lifetime: m.refresh_token_lifetime,
            id_token_lifetime: m.id_token_lifetime,
            require_pkce: m.require_pkce,
            require_consent: m.require_consent,
            trusted: m.trusted,
            is_confidential: m.is_confidential,
            is_active: m.is_active,
            deleted_at: m.deleted_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Result of registration: the only place the plaintext secret appears.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedClient {
    #[serde(flatten)]
    pub client: ClientInfo,
    /// Shown once. `None` for public clients.
    pub client_secret: Option<String>,
}

fn validate_uris(field: &str, uris: &[String], required: bool) -> Result<(), RegistryError> {
    if required && uris.is_empty() {
        return Err(RegistryError::Invalid(format!("{field} must not be empty")));
    }
    for uri in uris {
        let parsed = url::Url::parse(uri)
            .map_err(|e| RegistryError::Invalid(format!("{field}: '{uri}' is not a URL: {e}")))?;
        if parsed.fragment().is_some() {
            return Err(RegistryError::Invalid(format!(
                "{field}: '{uri}' must not contain a fragment"
            )));
        }
    }
    Ok(())
}

fn validate_subset(
    field: &str,
    values: &[String],
    supported: &[&str],
) -> Result<(), RegistryError> {
    if values.is_empty() {
        return Err(RegistryError::Invalid(format!("{field} must not be empty")));
    }
    match values.iter().find(|v| !supported.contains(&v.as_str())) {
        Some(v) => Err(RegistryError::Invalid(format!("{field}: '{v}' is not supported"))),
        None => Ok(()),
    }
}

fn validate_scopes(scopes: &[String]) -> Result<(), RegistryError> {
    if scopes.is_empty() {
        return Err(RegistryError::Invalid("scopes must not be empty".into()));
    }
    if scopes.iter().any(|s| s.is_empty() || s.contains(char::is_whitespace)) {
        return Err(RegistryError::Invalid("scopes must be single tokens".into()));
    }
    Ok(())
}

fn validate_lifetime(field: &str, value: Option<i64>) -> Result<(), RegistryError> {
    match value {
        Some(v) if v <= 0 => Err(RegistryError::Invalid(format!("{field} must be positive"))),
        _ => Ok(()),
    }
}

fn to_json(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn hash(secret: &str) -> Result<String, RegistryError> {
    hash_secret(secret).map_err(|e| RegistryError::Hash(e.to_string()))
}

#[derive(Clone, Debug)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewClient) -> Result<CreatedClient, RegistryError> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::Invalid("name must not be empty".into()));
        }
        validate_uris("redirect_uris", &new.redirect_uris, true)?;
        validate_uris("post_logout_redirect_uris", &new.post_logout_redirect_uris, false)?;
        validate_scopes(&new.scopes)?;
        validate_subset("grant_types", &new.grant_types, SUPPORTED_GRANT_TYPES)?;
        validate_subset("response_types", &new.response_types, SUPPORTED_RESPONSE_TYPES)?;
        validate_lifetime("access_token_lifetime", new.access_token_lifetime)?;
        validate_lifetime("refresh_token_lifetime", new.refresh_token_lifetime)?;
        validate_lifetime("id_token_lifetime", new.id_token_lifetime)?;

        let client_secret = new.is_confidential.then(generate_client_secret);
        let secret_hash = client_secret.as_deref().map(hash).transpose()?;
        let now = OffsetDateTime::now_utc();

        let model = oauth2_client::ActiveModel {
            client_id: Set(uuid::Uuid::new_v4().to_string()),
            secret_hash: Set(secret_hash),
            name: Set(new.name),
            redirect_uris: Set(to_json(&new.redirect_uris)),
            post_logout_redirect_uris: Set(to_json(&new.post_logout_redirect_uris)),
            scopes: Set(new.scopes.join(" ")),
            grant_types: Set(new.grant_types.join(" ")),
            response_types: Set(new.response_types.join(" ")),
            access_token_lifetime: Set(new.access_token_lifetime),
            refresh_token_lifetime: Set(new.refresh_token_lifetime),
            id_token_lifetime: Set(new.id_token_lifetime),
            require_pkce: Set(new.require_pkce),
            require_consent: Set(new.require_consent),
            trusted: Set(new.trusted),
            is_confidential: Set(new.is_confidential),
            is_active: Set(true),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            client_id = %model.client_id,
            name = %model.name,
            "OAuth2 client registered"
        );
        Ok(CreatedClient {
            client: model.into(),
            client_secret,
        })
    }

    /// Any client, including inactive and soft-deleted ones.
    pub async fn get(&self, client_id: &str) -> Result<Option<ClientInfo>, DbErr> {
        Ok(oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .map(ClientInfo::from))
    }

    pub async fn list(&self, include_deleted: bool) -> Result<Vec<ClientInfo>, DbErr> {
        let mut query =
            oauth2_client::Entity::find().order_by_asc(oauth2_client::Column::CreatedAt);
        if !include_deleted {
            query = query.filter(oauth2_client::Column::DeletedAt.is_null());
        }
        Ok(query
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(ClientInfo::from)
            .collect())
    }

    /// Raw record for a client that has not been deleted, active or not.
    pub async fn find(&self, client_id: &str) -> Result<Option<oauth2_client::Model>, DbErr> {
        oauth2_client::Entity::find_by_id(client_id)
            .filter(oauth2_client::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
    }

    /// A client that may currently take part in a flow: active and not deleted.
    pub async fn find_usable(
        &self,
        client_id: &str,
    ) -> Result<Option<oauth2_client::Model>, DbErr> {
        Ok(oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .filter(oauth2_client::Model::is_usable))
    }

    /// Confidential client authentication. Every failure is the same `None`
    /// and costs one PBKDF2 derivation, whether or not the client exists.
    pub async fn verify_client_credentials(
        &self,
        client_id: &str,
        secret: &str,
    ) -> Result<Option<oauth2_client::Model>, DbErr> {
        let client = self.find_usable(client_id).await?;
        let stored = client.as_ref().and_then(|c| c.secret_hash.as_deref());
        let valid = verify_stored_secret(secret, stored);
        Ok(client.filter(|_| valid))
    }

    pub async fn update(
        &self,
        client_id: &str,
        update: ClientUpdate,
    ) -> Result<ClientInfo, RegistryError> {
        let client = oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .filter(|c| c.deleted_at.is_none())
            .ok_or(RegistryError::NotFound)?;

        let mut active: oauth2_client::ActiveModel = client.into();
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(RegistryError::Invalid("name must not be empty".into()));
            }
            active.name = Set(name);
        }
        if let Some(uris) = update.redirect_uris {
            validate_uris("redirect_uris", &uris, true)?;
            active.redirect_uris = Set(to_json(&uris));
        }
        if let Some(uris) = update.post_logout_redirect_uris {
            validate_uris("post_logout_redirect_uris", &uris, false)?;
            active.post_logout_redirect_uris = Set(to_json(&uris));
        }
        if let Some(scopes) = update.scopes {
            validate_scopes(&scopes)?;
            active.scopes = Set(scopes.join(" "));
        }
        if let Some(grant_types) = update.grant_types {
            validate_subset("grant_types", &grant_types, SUPPORTED_GRANT_TYPES)?;
            active.grant_types = Set(grant_types.join(" "));
        }
        if let Some(response_types) = update.response_types {
            validate_subset("response_types", &response_types, SUPPORTED_RESPONSE_TYPES)?;
            active.response_types = Set(response_types.join(" "));
        }
        if update.access_token_lifetime.is_some() {
            validate_lifetime("access_token_lifetime", update.access_token_lifetime)?;
            active.access_token_lifetime = Set(update.access_token_lifetime);
        }
        if update.refresh_token_lifetime.is_some() {
            validate_lifetime("refresh_token_lifetime", update.refresh_token_lifetime)?;
            active.refresh_token_lifetime = Set(update.refresh_token_lifetime);
        }
        if update.id_token_lifetime.is_some() {
            validate_lifetime("id_token_lifetime", update.id_token_lifetime)?;
            active.id_token_lifetime = Set(update.id_token_lifetime);
        }
        if let Some(v) = update.require_pkce {
            active.require_pkce = Set(v);
        }
        if let Some(v) = update.require_consent {
            active.require_consent = Set(v);
        }
        if let Some(v) = update.trusted {
            active.trusted = Set(v);
        }
        active.updated_at = Set(OffsetDateTime::now_utc());

        let model = active.update(self.db.as_ref()).await?;
        tracing::info!(client_id, "OAuth2 client updated");
        Ok(model.into())
    }

    /// Replace the secret hash in one conditional write and return the new
    /// plaintext. The old secret stops verifying as soon as this returns.
    pub async fn rotate_secret(&self, client_id: &str) -> Result<String, RegistryError> {
        let client = oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .filter(|c| c.deleted_at.is_none())
            .ok_or(RegistryError::NotFound)?;
        if !client.is_confidential {
            return Err(RegistryError::PublicClient);
        }

        let secret = generate_client_secret();
        let secret_hash = hash(&secret)?;
        let result = oauth2_client::Entity::update_many()
            .col_expr(oauth2_client::Column::SecretHash, Expr::value(secret_hash))
            .col_expr(
                oauth2_client::Column::UpdatedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_client::Column::ClientId.eq(client_id))
            .filter(oauth2_client::Column::DeletedAt.is_null())
            .filter(oauth2_client::Column::IsConfidential.eq(true))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected != 1 {
            return Err(RegistryError::NotFound);
        }

        tracing::info!(client_id, "OAuth2 client secret rotated");
        Ok(secret)
    }

    pub async fn set_active(
        &self,
        client_id: &str,
        active: bool,
    ) -> Result<ClientInfo, RegistryError> {
        let result = oauth2_client::Entity::update_many()
            .col_expr(oauth2_client::Column::IsActive, Expr::value(active))
            .col_expr(
                oauth2_client::Column::UpdatedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_client::Column::ClientId.eq(client_id))
            .filter(oauth2_client::Column::DeletedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected != 1 {
            return Err(RegistryError::NotFound);
        }
        tracing::info!(client_id, active, "OAuth2 client activation changed");
        self.get(client_id).await?.ok_or(RegistryError::NotFound)
    }

    /// Soft delete marks the row; hard delete removes it together with every
    /// code, consent, refresh token and session link referencing it.
    pub async fn delete(&self, client_id: &str, hard: bool) -> Result<(), RegistryError> {
        if !hard {
            let now = OffsetDateTime::now_utc();
            let result = oauth2_client::Entity::update_many()
                .col_expr(oauth2_client::Column::DeletedAt, Expr::value(now))
                .col_expr(oauth2_client::Column::IsActive, Expr::value(false))
                .col_expr(oauth2_client::Column::UpdatedAt, Expr::value(now))
                .filter(oauth2_client::Column::ClientId.eq(client_id))
                .filter(oauth2_client::Column::DeletedAt.is_null())
                .exec(self.db.as_ref())
                .await?;
            if result.rows_affected != 1 {
                return Err(RegistryError::NotFound);
            }
            tracing::info!(client_id, "OAuth2 client soft-deleted");
            return Ok(());
        }

        let txn = self.db.begin().await?;
        oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        oauth2_consent::Entity::delete_many()
            .filter(oauth2_consent::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        oauth2_session_client::Entity::delete_many()
            .filter(oauth2_session_client::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        let result = oauth2_client::Entity::delete_by_id(client_id)
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            txn.rollback().await?;
            return Err(RegistryError::NotFound);
        }
        txn.commit().await?;

        tracing::info!(client_id, "OAuth2 client deleted");
        Ok(())
    }
}
