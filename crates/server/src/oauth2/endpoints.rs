//! OAuth2 / OpenID Connect protocol endpoints.
//!
//! - `GET /oauth2/authorize` - Authorization endpoint
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation (RFC 7009)
//! - `GET|POST /oauth2/userinfo` - OpenID Connect UserInfo
//! - `GET /oauth2/jwks` - Signing keys
//! - `GET /.well-known/openid-configuration` - Discovery document

use axum::{
    Form, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::entity::oauth2_client;
use crate::error::{ErrorResponse, ProtocolError};
use crate::oauth2::claims::{
    SCOPE_OPENID, SUPPORTED_CLAIMS, SUPPORTED_SCOPES, ScopedClaims, has_scope, parse_scope,
};
use crate::oauth2::clients::{
    GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN, RESPONSE_TYPE_CODE, SUPPORTED_GRANT_TYPES,
    SUPPORTED_RESPONSE_TYPES,
};
use crate::oauth2::codes::NewAuthorizationCode;
use crate::oauth2::keys::{JsonWebKeySet, SIGNING_ALGORITHM};
use crate::oauth2::login::current_session;
use crate::oauth2::pkce::{CodeChallengeMethod, validate_pkce_auth_params};
use crate::oauth2::tokens::IssuedTokens;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};

/// Discovery and JWKS responses may be cached by Relying Parties.
pub const METADATA_CACHE_CONTROL: &str = "public, max-age=3600";

// =============================================================================
// Request/Response Types
// =============================================================================

/// OAuth2 authorization request parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeRequest {
    /// Must be `code`
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    /// Must exactly match a registered redirect URI
    pub redirect_uri: Option<String>,
    /// Space-separated list of requested scopes
    pub scope: Option<String>,
    /// Opaque value returned unchanged in the redirect
    pub state: Option<String>,
    /// Echoed in the ID token for replay protection
    pub nonce: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// `S256` or `plain`
    pub code_challenge_method: Option<String>,
    /// `none` to fail instead of showing the login or consent page
    pub prompt: Option<String>,
}

impl AuthorizeRequest {
    /// Form-encoded query string holding every present parameter.
    pub fn to_query(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        let pairs = [
            ("response_type", &self.response_type),
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
            ("scope", &self.scope),
            ("state", &self.state),
            ("nonce", &self.nonce),
            ("code_challenge", &self.code_challenge),
            ("code_challenge_method", &self.code_challenge_method),
            ("prompt", &self.prompt),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }
        query.finish()
    }

    /// Local path that replays this request against the authorization endpoint.
    pub fn authorize_path(&self) -> String {
        format!("/oauth2/authorize?{}", self.to_query())
    }

    fn prompt_none(&self) -> bool {
        self.prompt
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|v| v == "none"))
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Narrower scope for a refresh grant
    pub scope: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(issued: IssuedTokens) -> Self {
        Self {
            access_token: issued.access_token,
            token_type: "Bearer".to_string(),
            expires_in: issued.expires_in,
            refresh_token: issued.refresh_token,
            id_token: issued.id_token,
            scope: issued.scope,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// UserInfo claims: `sub` plus whatever the token's scopes allow.
#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(flatten)]
    pub claims: ScopedClaims,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub end_session_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, jar, params), fields(client_id = ?params.client_id))]
#[utoipa::path(
    get,
    path = "/oauth2/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the Authorization Code flow",
    description = "Validates the client and redirect URI, then sends the browser to the login page, \
                   the consent page, or back to the client with an authorization code.\n\n\
                   Errors detected before the redirect URI is trusted are returned as JSON. \
                   Later errors are redirected to the client with `error`, `error_description` and `state`.\n\n\
                   **PKCE:** mandatory for public clients and clients registered with `require_pkce`.",
    params(AuthorizeRequest),
    responses(
        (status = 303, description = "Redirect to login, consent, or the client"),
        (status = 400, description = "Unknown client or unregistered redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Query(params): Query<AuthorizeRequest>,
) -> Response {
    let (client, redirect_uri) = match resolve_client(
        &state,
        params.client_id.as_deref(),
        params.redirect_uri.as_deref(),
    )
    .await
    {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    match continue_authorization(&state, &jar, &params, &client, &redirect_uri).await {
        Ok(location) => Redirect::to(&location).into_response(),
        Err(e) => error_redirect(&redirect_uri, params.state.as_deref(), &e),
    }
}

/// Everything after the redirect URI is trusted. Errors go back to the client.
async fn continue_authorization(
    state: &OAuth2State,
    jar: &CookieJar,
    params: &AuthorizeRequest,
    client: &oauth2_client::Model,
    redirect_uri: &str,
) -> Result<String, ProtocolError> {
    match params.response_type.as_deref() {
        Some(RESPONSE_TYPE_CODE) => {}
        Some(_) => return Err(ProtocolError::UnsupportedResponseType),
        None => return Err(ProtocolError::invalid_request("response_type is required")),
    }
    if !client.supports_response_type(RESPONSE_TYPE_CODE)
        || !client.supports_grant_type(GRANT_AUTHORIZATION_CODE)
    {
        return Err(ProtocolError::unauthorized_client(
            "Client may not use the authorization code flow",
        ));
    }

    let scopes = parse_scope(params.scope.as_deref().unwrap_or_default());
    if scopes.is_empty() {
        return Err(ProtocolError::invalid_scope("scope is required"));
    }
    if !client.can_request_scope(&scopes) {
        return Err(ProtocolError::invalid_scope(
            "Requested scope is not allowed for this client",
        ));
    }

    let pkce = validate_pkce_auth_params(
        params.code_challenge.as_deref(),
        params.code_challenge_method.as_deref(),
        client.pkce_required(),
    )?;

    let Some(session) = current_session(state, jar).await? else {
        if params.prompt_none() {
            return Err(ProtocolError::LoginRequired);
        }
        return Ok(format!(
            "/oauth2/login?return_to={}",
            urlencoding::encode(&params.authorize_path())
        ));
    };
    let Some(user) = state.users.find_by_id(&session.user_id).await? else {
        state.sessions.terminate(&session.id).await?;
        return Err(ProtocolError::LoginRequired);
    };

    if state
        .consents
        .requires_consent(client, &user.id, &scopes)
        .await?
    {
        if params.prompt_none() {
            return Err(ProtocolError::ConsentRequired);
        }
        return Ok(format!("/oauth2/consent?{}", params.to_query()));
    }

    let code = state
        .codes
        .create(NewAuthorizationCode {
            client_id: client.client_id.clone(),
            user_id: user.id.clone(),
            redirect_uri: redirect_uri.to_string(),
            scopes,
            nonce: params.nonce.clone(),
            pkce,
            auth_time: session.auth_time,
        })
        .await?;
    state
        .sessions
        .link_client(&session.id, &client.client_id)
        .await?;

    let mut pairs = vec![("code", code.as_str())];
    if let Some(s) = params.state.as_deref() {
        pairs.push(("state", s));
    }
    append_query(redirect_uri, &pairs)
        .ok_or_else(|| ProtocolError::server("registered redirect_uri is not a URL"))
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params), fields(grant_type = ?params.grant_type))]
#[utoipa::path(
    post,
    path = "/oauth2/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or refresh token for tokens",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: single-use code plus `redirect_uri` and, when bound, `code_verifier`\n\
                   - `refresh_token`: rotates the refresh token; reusing a rotated token revokes the whole chain\n\n\
                   **Client authentication:**\n\
                   - Confidential clients: HTTP Basic or `client_id` + `client_secret` in the body\n\
                   - Public clients: `client_id` in the body",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant or scope", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Result<Response, ProtocolError> {
    let client = authenticate_client(
        &state,
        &headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )
    .await?;

    let grant_type = params
        .grant_type
        .as_deref()
        .ok_or_else(|| ProtocolError::invalid_request("grant_type is required"))?;
    if !SUPPORTED_GRANT_TYPES.contains(&grant_type) {
        return Err(ProtocolError::UnsupportedGrantType);
    }
    if !client.supports_grant_type(grant_type) {
        return Err(ProtocolError::unauthorized_client(format!(
            "Client may not use the {grant_type} grant"
        )));
    }

    let issued = match grant_type {
        GRANT_AUTHORIZATION_CODE => authorization_code_grant(&state, &client, &params).await?,
        GRANT_REFRESH_TOKEN => refresh_token_grant(&state, &client, &params).await?,
        _ => return Err(ProtocolError::UnsupportedGrantType),
    };
    if let Some(claims) = &issued.refresh_claims {
        state.refresh_tokens.record(claims).await?;
    }

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(TokenResponse::from(issued)),
    )
        .into_response())
}

async fn authorization_code_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<IssuedTokens, ProtocolError> {
    let code = params
        .code
        .as_deref()
        .ok_or_else(|| ProtocolError::invalid_request("code is required"))?;
    let redirect_uri = params
        .redirect_uri
        .as_deref()
        .ok_or_else(|| ProtocolError::invalid_request("redirect_uri is required"))?;

    let record = state
        .codes
        .validate_and_consume(
            code,
            &client.client_id,
            redirect_uri,
            params.code_verifier.as_deref(),
        )
        .await?;

    let user = state
        .users
        .find_by_id(&record.user_id)
        .await?
        .ok_or_else(|| ProtocolError::invalid_grant("Invalid authorization code"))?;

    Ok(state.tokens.issue_tokens(
        &user,
        client,
        &record.scopes_list(),
        record.nonce.as_deref(),
        record.auth_time,
    )?)
}

async fn refresh_token_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<IssuedTokens, ProtocolError> {
    let presented = params
        .refresh_token
        .as_deref()
        .ok_or_else(|| ProtocolError::invalid_request("refresh_token is required"))?;

    let claims = state
        .tokens
        .verify_refresh_token(presented, &client.client_id)
        .map_err(|e| {
            tracing::debug!(client_id = %client.client_id, error = %e, "Refresh token rejected");
            ProtocolError::invalid_grant("Invalid refresh token")
        })?;
    if claims.client_id != client.client_id {
        return Err(ProtocolError::invalid_grant("Invalid refresh token"));
    }

    let granted = claims.scopes();
    let scopes = match params.scope.as_deref() {
        Some(requested) => {
            let requested = parse_scope(requested);
            if requested.is_empty() || !requested.iter().all(|s| granted.contains(s)) {
                return Err(ProtocolError::invalid_scope(
                    "Requested scope exceeds the original grant",
                ));
            }
            requested
        }
        None => granted,
    };
    // The client's allowed scopes may have shrunk since the original grant.
    if !client.can_request_scope(&scopes) {
        return Err(ProtocolError::invalid_scope(
            "Requested scope is not allowed for this client",
        ));
    }

    state.refresh_tokens.consume(&claims).await?;

    let user = state
        .users
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(|| ProtocolError::invalid_grant("Invalid refresh token"))?;
    let auth_time = time::OffsetDateTime::from_unix_timestamp(claims.auth_time)
        .map_err(|e| ProtocolError::server(format!("refresh token auth_time: {e}")))?;

    tracing::info!(client_id = %client.client_id, user_id = %user.id, "Refresh token rotated");
    Ok(state
        .tokens
        .issue_tokens(&user, client, &scopes, None, auth_time)?)
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/oauth2/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke a refresh token",
    description = "Revokes a refresh token issued to the authenticated client. Implements RFC 7009.\n\n\
                   Returns 200 OK whether or not the token was known, valid, or already revoked. \
                   Access tokens are short-lived signed JWTs and expire on their own.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<RevokeRequest>,
) -> Result<StatusCode, ProtocolError> {
    let client = authenticate_client(
        &state,
        &headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )
    .await?;

    if params
        .token_type_hint
        .as_deref()
        .is_some_and(|hint| hint != "refresh_token")
    {
        tracing::debug!(hint = ?params.token_type_hint, "Ignoring token_type_hint");
    }

    match state
        .tokens
        .verify_refresh_token(&params.token, &client.client_id)
    {
        Ok(claims) if claims.client_id == client.client_id => {
            if let Err(e) = state.refresh_tokens.revoke(&claims.jti).await {
                tracing::error!("Failed to revoke refresh token: {}", e);
            } else {
                tracing::info!(client_id = %client.client_id, "Refresh token revoked");
            }
        }
        _ => {}
    }

    Ok(StatusCode::OK)
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/oauth2/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Claims about the authenticated user",
    description = "Requires an access token with the `openid` scope as a Bearer token.\n\n\
                   **Returned claims depend on the token's scopes:**\n\
                   - `openid`: `sub`\n\
                   - `profile`: `name`, `given_name`, `family_name`, `picture`\n\
                   - `email`: `email`, `email_verified`\n\
                   - `phone`: `phone_number`, `phone_number_verified`\n\
                   - `school`: `school_id`, `role`",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User claims", content_type = "application/json"),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Token lacks the `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, ProtocolError> {
    userinfo_claims(&state, &headers).await.map(Json)
}

/// OpenID Connect UserInfo endpoint (POST form).
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    post,
    path = "/oauth2/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo (POST)",
    summary = "Claims about the authenticated user",
    description = "Same as `GET /oauth2/userinfo`.",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User claims", content_type = "application/json"),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Token lacks the `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo_post(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, ProtocolError> {
    userinfo_claims(&state, &headers).await.map(Json)
}

async fn userinfo_claims(
    state: &OAuth2State,
    headers: &HeaderMap,
) -> Result<UserInfoResponse, ProtocolError> {
    let token = bearer_token(headers)?;
    let claims = state.tokens.verify_access_token(token)?;

    if state.clients.find_usable(&claims.client_id).await?.is_none() {
        return Err(ProtocolError::invalid_token("Client is no longer active"));
    }
    let scopes = claims.scopes();
    if !has_scope(&scopes, SCOPE_OPENID) {
        return Err(ProtocolError::InsufficientScope(
            "Token does not have 'openid' scope".to_string(),
        ));
    }
    let user = state
        .users
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(|| ProtocolError::invalid_token("Unknown subject"))?;

    Ok(UserInfoResponse {
        claims: ScopedClaims::from_user(&user, &scopes),
        sub: user.id,
    })
}

/// JSON Web Key Set used to verify issued tokens.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth2/jwks",
    tag = OAUTH2_TAG,
    operation_id = "JWKS",
    summary = "Public signing keys",
    description = "RSA public keys (`n`, `e`, `kid`, `alg = RS256`) for verifying ID and access tokens \
                   without contacting the provider per request.",
    responses(
        (status = 200, description = "Key set", body = JsonWebKeySet),
    )
)]
pub async fn jwks(State(state): State<OAuth2State>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, METADATA_CACHE_CONTROL)],
        Json(state.tokens.jwks()),
    )
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Endpoint URLs, supported scopes, claims, grant types, response types, \
                   signing algorithms and PKCE methods.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> impl IntoResponse {
    let document = OpenIdConfiguration {
        issuer: state.issuer().to_string(),
        authorization_endpoint: state.endpoint("/oauth2/authorize"),
        token_endpoint: state.endpoint("/oauth2/token"),
        userinfo_endpoint: state.endpoint("/oauth2/userinfo"),
        jwks_uri: state.endpoint("/oauth2/jwks"),
        end_session_endpoint: state.endpoint("/oauth2/logout"),
        revocation_endpoint: state.endpoint("/oauth2/revoke"),
        response_types_supported: strings(SUPPORTED_RESPONSE_TYPES),
        grant_types_supported: strings(SUPPORTED_GRANT_TYPES),
        subject_types_supported: strings(&["public"]),
        id_token_signing_alg_values_supported: strings(&[SIGNING_ALGORITHM]),
        scopes_supported: strings(SUPPORTED_SCOPES),
        claims_supported: strings(SUPPORTED_CLAIMS),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        code_challenge_methods_supported: strings(&[
            CodeChallengeMethod::S256.as_str(),
            CodeChallengeMethod::Plain.as_str(),
        ]),
    };
    (
        [(header::CACHE_CONTROL, METADATA_CACHE_CONTROL)],
        Json(document),
    )
}

// =============================================================================
// Helper Functions
// =============================================================================

fn json_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            error_description: Some(description.to_string()),
        }),
    )
        .into_response()
}

/// Look up a usable client and check the redirect URI exactly. Failures are
/// rendered as JSON since the redirect URI cannot be trusted yet.
pub(crate) async fn resolve_client(
    state: &OAuth2State,
    client_id: Option<&str>,
    redirect_uri: Option<&str>,
) -> Result<(oauth2_client::Model, String), Response> {
    let Some(client_id) = client_id else {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "client_id is required",
        ));
    };
    let client = match state.clients.find_usable(client_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "invalid_client",
                "Unknown or inactive client",
            ));
        }
        Err(e) => return Err(ProtocolError::from(e).into_response()),
    };
    let Some(redirect_uri) = redirect_uri else {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is required",
        ));
    };
    if !client.validate_redirect_uri(redirect_uri) {
        tracing::warn!(client_id, "Unregistered redirect_uri rejected");
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Invalid redirect_uri",
        ));
    }
    Ok((client, redirect_uri.to_string()))
}

/// Append query parameters to an absolute URL.
pub(crate) fn append_query(base: &str, pairs: &[(&str, &str)]) -> Option<String> {
    let mut url = url::Url::parse(base).ok()?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }
    Some(url.into())
}

/// Send an OAuth error back to a trusted redirect URI.
pub(crate) fn error_redirect(
    redirect_uri: &str,
    state: Option<&str>,
    error: &ProtocolError,
) -> Response {
    if let ProtocolError::Server(detail) = error {
        tracing::error!("Authorization request failed: {}", detail);
    }
    let description = error.description();
    let mut pairs = vec![("error", error.code())];
    if let Some(d) = description.as_deref() {
        pairs.push(("error_description", d));
    }
    if let Some(s) = state {
        pairs.push(("state", s));
    }
    match append_query(redirect_uri, &pairs) {
        Some(location) => Redirect::to(&location).into_response(),
        None => {
            let status = error.status();
            (status, Json(error.body())).into_response()
        }
    }
}

/// Client credentials from HTTP Basic (preferred) or the form body.
fn extract_client_credentials(
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) = STANDARD.decode(auth)
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
        && let (Ok(id), Ok(secret)) = (urlencoding::decode(id), urlencoding::decode(secret))
    {
        return (Some(id.into_owned()), Some(secret.into_owned()));
    }
    (client_id.map(String::from), client_secret.map(String::from))
}

/// Authenticate the calling client. Confidential clients must present their
/// secret; public clients identify themselves with `client_id` alone.
pub(crate) async fn authenticate_client(
    state: &OAuth2State,
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<oauth2_client::Model, ProtocolError> {
    let (client_id, secret) = extract_client_credentials(headers, client_id, client_secret);
    let Some(client_id) = client_id else {
        return Err(ProtocolError::InvalidClient);
    };
    let client = match secret.as_deref() {
        Some(secret) => {
            state
                .clients
                .verify_client_credentials(&client_id, secret)
                .await?
        }
        None => state
            .clients
            .find_usable(&client_id)
            .await?
            .filter(|c| !c.is_confidential),
    };
    client.ok_or_else(|| {
        tracing::warn!(client_id = %client_id, "Client authentication failed");
        ProtocolError::InvalidClient
    })
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ProtocolError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProtocolError::invalid_token("Missing or invalid Authorization header"))
}
