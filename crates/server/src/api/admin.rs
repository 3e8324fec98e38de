//! Administrative API for clients, users, consents and sessions.
//!
//! All routes live under `/admin` and require the [`AdminAuth`] bearer key.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::auth::{AdminAuth, AdminError};
use crate::entity::{oauth2_consent, oauth2_user};
use crate::oauth2::OAuth2State;
use crate::oauth2::clients::{ClientInfo, ClientUpdate, CreatedClient, NewClient, RegistryError};
use crate::oauth2::users::{NewUser, UserError};

/// Tag for OpenAPI documentation.
pub const ADMIN_TAG: &str = "Admin";

impl From<RegistryError> for AdminError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound => AdminError::not_found("Client not found"),
            RegistryError::PublicClient => {
                AdminError::bad_request("Public clients have no client secret")
            }
            RegistryError::Invalid(msg) => AdminError::bad_request(msg),
            RegistryError::Hash(msg) => {
                tracing::error!("Failed to hash client secret: {}", msg);
                AdminError::server_error()
            }
            RegistryError::Db(e) => e.into(),
        }
    }
}

impl From<UserError> for AdminError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::EmailTaken => AdminError::conflict("A user with this email already exists"),
            UserError::Invalid(msg) => AdminError::bad_request(msg),
            UserError::Hash(msg) => {
                tracing::error!("Failed to hash password: {}", msg);
                AdminError::server_error()
            }
            UserError::Db(e) => e.into(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListClientsQuery {
    /// Include soft-deleted clients
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteClientQuery {
    /// Remove the record and every code, consent, refresh token and session link for it
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClientsListResponse {
    pub clients: Vec<ClientInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RotatedSecret {
    pub client_id: String,
    /// Shown once
    pub client_secret: String,
}

/// User record without credentials.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub school_id: Option<String>,
    pub role: Option<String>,
    pub permissions: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<oauth2_user::Model> for UserSummary {
    fn from(user: oauth2_user::Model) -> Self {
        Self {
            permissions: user.permissions_list(),
            id: user.id,
            email: user.email,
            email_verified: user.email_verified,
            name: user.name,
            school_id: user.school_id,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentDto {
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub granted_at: OffsetDateTime,
}

impl From<oauth2_consent::Model> for ConsentDto {
    fn from(consent: oauth2_consent::Model) -> Self {
        Self {
            scopes: consent.scopes_list(),
            client_id: consent.client_id,
            granted_at: consent.granted_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokedConsent {
    pub revoked: bool,
    /// Refresh tokens of the pair that were revoked alongside
    pub refresh_tokens_revoked: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TerminatedSessions {
    pub terminated: u64,
}

/// Creates the admin API router.
#[tracing::instrument(skip_all)]
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_clients, create_client))
        .routes(routes!(get_client, update_client, delete_client))
        .routes(routes!(rotate_client_secret))
        .routes(routes!(activate_client))
        .routes(routes!(deactivate_client))
        .routes(routes!(create_user))
        .routes(routes!(list_user_consents))
        .routes(routes!(revoke_user_consent))
        .routes(routes!(terminate_user_sessions))
        .with_state(state)
}

/// Register a new client.
#[tracing::instrument(skip(state, payload), fields(name = %payload.name))]
#[utoipa::path(
    post,
    path = "/clients",
    tag = ADMIN_TAG,
    operation_id = "Create Client",
    summary = "Register a Relying Party",
    description = "Creates a client. Confidential clients receive a generated `client_secret` \
                   which is returned once and stored only as a PBKDF2 hash.",
    security(("admin_key" = [])),
    request_body(content = NewClient, description = "Client registration"),
    responses(
        (status = 201, description = "Client created", body = CreatedClient),
        (status = 400, description = "Invalid client configuration", body = AdminError),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
    )
)]
async fn create_client(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Json(payload): Json<NewClient>,
) -> Result<(StatusCode, Json<CreatedClient>), AdminError> {
    let created = state.clients.create(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List registered clients.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/clients",
    tag = ADMIN_TAG,
    operation_id = "List Clients",
    summary = "List registered clients",
    security(("admin_key" = [])),
    params(ListClientsQuery),
    responses(
        (status = 200, description = "Clients", body = ClientsListResponse),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
    )
)]
async fn list_clients(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Query(query): Query<ListClientsQuery>,
) -> Result<Json<ClientsListResponse>, AdminError> {
    let clients = state.clients.list(query.include_deleted).await?;
    Ok(Json(ClientsListResponse {
        total: clients.len(),
        clients,
    }))
}

/// Fetch one client.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/clients/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Get Client",
    summary = "Fetch a client",
    security(("admin_key" = [])),
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Client", body = ClientInfo),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 404, description = "Unknown client", body = AdminError),
    )
)]
async fn get_client(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(client_id): Path<String>,
) -> Result<Json<ClientInfo>, AdminError> {
    state
        .clients
        .get(&client_id)
        .await?
        .map(Json)
        .ok_or_else(|| AdminError::not_found("Client not found"))
}

/// Update client settings.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    patch,
    path = "/clients/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Update Client",
    summary = "Update client settings",
    description = "Absent fields are left unchanged. The client secret cannot be changed here; \
                   use the rotate-secret endpoint.",
    security(("admin_key" = [])),
    params(("client_id" = String, Path, description = "Client identifier")),
    request_body(content = ClientUpdate, description = "Fields to change"),
    responses(
        (status = 200, description = "Updated client", body = ClientInfo),
        (status = 400, description = "Invalid client configuration", body = AdminError),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 404, description = "Unknown client", body = AdminError),
    )
)]
async fn update_client(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(client_id): Path<String>,
    Json(payload): Json<ClientUpdate>,
) -> Result<Json<ClientInfo>, AdminError> {
    Ok(Json(state.clients.update(&client_id, payload).await?))
}

/// Delete a client.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/clients/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Delete Client",
    summary = "Delete a client",
    description = "A soft delete deactivates the client and keeps the record. `hard=true` removes the \
                   client with all of its codes, consents, refresh tokens and session links. \
                   Either way the client can no longer obtain tokens.",
    security(("admin_key" = [])),
    params(
        ("client_id" = String, Path, description = "Client identifier"),
        DeleteClientQuery,
    ),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 404, description = "Unknown client", body = AdminError),
    )
)]
async fn delete_client(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(client_id): Path<String>,
    Query(query): Query<DeleteClientQuery>,
) -> Result<StatusCode, AdminError> {
    state.clients.delete(&client_id, query.hard).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rotate a confidential client's secret.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/clients/{client_id}/rotate-secret",
    tag = ADMIN_TAG,
    operation_id = "Rotate Client Secret",
    summary = "Issue a new client secret",
    description = "Replaces the stored hash atomically; the previous secret stops working immediately.",
    security(("admin_key" = [])),
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "New secret", body = RotatedSecret),
        (status = 400, description = "Client is public", body = AdminError),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 404, description = "Unknown client", body = AdminError),
    )
)]
async fn rotate_client_secret(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(client_id): Path<String>,
) -> Result<Json<RotatedSecret>, AdminError> {
    let client_secret = state.clients.rotate_secret(&client_id).await?;
    Ok(Json(RotatedSecret {
        client_id,
        client_secret,
    }))
}

/// Re-enable a client.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/clients/{client_id}/activate",
    tag = ADMIN_TAG,
    operation_id = "Activate Client",
    summary = "Activate a client",
    security(("admin_key" = [])),
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Client", body = ClientInfo),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 404, description = "Unknown client", body = AdminError),
    )
)]
async fn activate_client(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(client_id): Path<String>,
) -> Result<Json<ClientInfo>, AdminError> {
    Ok(Json(state.clients.set_active(&client_id, true).await?))
}

/// Disable a client without deleting it.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/clients/{client_id}/deactivate",
    tag = ADMIN_TAG,
    operation_id = "Deactivate Client",
    summary = "Deactivate a client",
    description = "Inactive clients cannot start authorization requests, redeem codes, refresh \
                   tokens, or call UserInfo.",
    security(("admin_key" = [])),
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Client", body = ClientInfo),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 404, description = "Unknown client", body = AdminError),
    )
)]
async fn deactivate_client(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(client_id): Path<String>,
) -> Result<Json<ClientInfo>, AdminError> {
    Ok(Json(state.clients.set_active(&client_id, false).await?))
}

/// Provision a user.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/users",
    tag = ADMIN_TAG,
    operation_id = "Create User",
    summary = "Provision a user",
    description = "Creates a user in the directory. Emails are stored lowercased and must be unique.",
    security(("admin_key" = [])),
    request_body(content = NewUser, description = "User attributes"),
    responses(
        (status = 201, description = "User created", body = UserSummary),
        (status = 400, description = "Invalid user", body = AdminError),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
        (status = 409, description = "Email already registered", body = AdminError),
    )
)]
async fn create_user(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<UserSummary>), AdminError> {
    let user = state.users.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(UserSummary::from(user))))
}

/// List a user's live consents.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/users/{user_id}/consents",
    tag = ADMIN_TAG,
    operation_id = "List User Consents",
    summary = "List a user's consents",
    security(("admin_key" = [])),
    params(("user_id" = String, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Consents", body = Vec<ConsentDto>),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
    )
)]
async fn list_user_consents(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConsentDto>>, AdminError> {
    let consents = state.consents.list_for_user(&user_id).await?;
    Ok(Json(consents.into_iter().map(ConsentDto::from).collect()))
}

/// Revoke a user's consent for one client.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/users/{user_id}/consents/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Revoke User Consent",
    summary = "Revoke consent",
    description = "The next authorization request from this client shows the consent page again. \
                   Outstanding refresh tokens for the pair are revoked.",
    security(("admin_key" = [])),
    params(
        ("user_id" = String, Path, description = "User identifier"),
        ("client_id" = String, Path, description = "Client identifier"),
    ),
    responses(
        (status = 200, description = "Revocation result", body = RevokedConsent),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
    )
)]
async fn revoke_user_consent(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path((user_id, client_id)): Path<(String, String)>,
) -> Result<Json<RevokedConsent>, AdminError> {
    let revoked = state.consents.revoke(&user_id, &client_id).await?;
    let refresh_tokens_revoked = state
        .refresh_tokens
        .revoke_for_user_client(&user_id, &client_id)
        .await?;
    Ok(Json(RevokedConsent {
        revoked,
        refresh_tokens_revoked,
    }))
}

/// Terminate every active session of a user.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/users/{user_id}/sessions",
    tag = ADMIN_TAG,
    operation_id = "Terminate User Sessions",
    summary = "Sign a user out everywhere",
    security(("admin_key" = [])),
    params(("user_id" = String, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Number of sessions terminated", body = TerminatedSessions),
        (status = 401, description = "Missing or invalid admin key", body = AdminError),
    )
)]
async fn terminate_user_sessions(
    State(state): State<OAuth2State>,
    _auth: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<TerminatedSessions>, AdminError> {
    let terminated = state.sessions.terminate_all_for_user(&user_id).await?;
    Ok(Json(TerminatedSessions { terminated }))
}
