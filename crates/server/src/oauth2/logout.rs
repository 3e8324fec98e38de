//! OpenID Connect RP-Initiated Logout.

use askama::Template;
use axum::{
    Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, ProtocolError};
use crate::oauth2::endpoints::append_query;
use crate::oauth2::sessions::SESSION_COOKIE;
use crate::oauth2::views::render;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};

#[derive(Template)]
#[template(path = "logged_out.html")]
struct LoggedOutTemplate;

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct EndSessionRequest {
    /// Previously issued ID token; may be expired
    pub id_token_hint: Option<String>,
    /// Must match one of the client's registered post-logout redirect URIs
    pub post_logout_redirect_uri: Option<String>,
    /// Echoed back on the post-logout redirect
    pub state: Option<String>,
    /// Identifies the client when no `id_token_hint` is given; must match its
    /// audience otherwise
    pub client_id: Option<String>,
}

/// End the IdP session (GET).
#[tracing::instrument(skip(state, jar, params))]
#[utoipa::path(
    get,
    path = "/oauth2/logout",
    tag = OAUTH2_TAG,
    operation_id = "OIDC End Session",
    summary = "RP-initiated logout",
    description = "Terminates the IdP session named by the session cookie. When a valid `id_token_hint` \
                   identifies the user, every active session of that user is terminated.\n\n\
                   `post_logout_redirect_uri` must be registered for the client named by the hint's \
                   audience or by `client_id`; otherwise the request is rejected.",
    params(EndSessionRequest),
    responses(
        (status = 303, description = "Redirect to the post-logout redirect URI"),
        (status = 200, description = "Signed-out confirmation page"),
        (status = 400, description = "Unregistered post_logout_redirect_uri", body = ErrorResponse),
    )
)]
pub async fn end_session(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Query(params): Query<EndSessionRequest>,
) -> Response {
    handle_end_session(&state, jar, params).await
}

/// End the IdP session (POST form).
#[tracing::instrument(skip(state, jar, params))]
#[utoipa::path(
    post,
    path = "/oauth2/logout",
    tag = OAUTH2_TAG,
    operation_id = "OIDC End Session (POST)",
    summary = "RP-initiated logout",
    description = "Same as `GET /oauth2/logout` with form-encoded parameters.",
    request_body(
        content = EndSessionRequest,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 303, description = "Redirect to the post-logout redirect URI"),
        (status = 200, description = "Signed-out confirmation page"),
        (status = 400, description = "Unregistered post_logout_redirect_uri", body = ErrorResponse),
    )
)]
pub async fn end_session_post(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(params): Form<EndSessionRequest>,
) -> Response {
    handle_end_session(&state, jar, params).await
}

async fn handle_end_session(
    state: &OAuth2State,
    jar: CookieJar,
    params: EndSessionRequest,
) -> Response {
    match end_session_inner(state, &jar, &params).await {
        Ok(redirect) => {
            let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
            match redirect {
                Some(location) => (jar, Redirect::to(&location)).into_response(),
                None => (jar, render(&LoggedOutTemplate)).into_response(),
            }
        }
        Err(e) => e.into_response(),
    }
}

/// Terminates sessions and returns the validated redirect target, if any.
async fn end_session_inner(
    state: &OAuth2State,
    jar: &CookieJar,
    params: &EndSessionRequest,
) -> Result<Option<String>, ProtocolError> {
    // An unverifiable hint is ignored rather than trusted or fatal.
    let hint = params.id_token_hint.as_deref().and_then(|token| {
        state
            .tokens
            .verify_id_token_hint(token)
            .inspect_err(|e| tracing::warn!(error = %e, "Ignoring invalid id_token_hint"))
            .ok()
    });

    let conflicting = hint
        .as_ref()
        .zip(params.client_id.as_deref())
        .filter(|(claims, client_id)| claims.aud != *client_id);
    if let Some((claims, client_id)) = conflicting {
        tracing::warn!(
            client_id,
            hint_aud = %claims.aud,
            "client_id conflicts with id_token_hint"
        );
        return Err(ProtocolError::invalid_request(
            "client_id does not match the id_token_hint audience",
        ));
    }

    let redirect = match params.post_logout_redirect_uri.as_deref() {
        Some(uri) => {
            let client_id = hint
                .as_ref()
                .map(|claims| claims.aud.as_str())
                .or(params.client_id.as_deref());
            let client = match client_id {
                Some(id) => state.clients.find(id).await?,
                None => None,
            };
            if !client.is_some_and(|c| c.validate_post_logout_redirect_uri(uri)) {
                tracing::warn!(client_id = ?client_id, "Rejected post_logout_redirect_uri");
                return Err(ProtocolError::invalid_request(
                    "Invalid post_logout_redirect_uri",
                ));
            }
            let mut pairs = Vec::new();
            if let Some(s) = params.state.as_deref() {
                pairs.push(("state", s));
            }
            Some(append_query(uri, &pairs).ok_or_else(|| {
                ProtocolError::invalid_request("Invalid post_logout_redirect_uri")
            })?)
        }
        None => None,
    };

    let mut hint_matches_session = true;
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session_id = cookie.value();
        if let Some(claims) = &hint {
            let owner = state.sessions.get_active(session_id).await?.map(|s| s.user_id);
            if owner.as_ref().is_some_and(|owner| *owner != claims.sub) {
                tracing::warn!(
                    session_user_id = ?owner,
                    hint_sub = %claims.sub,
                    "id_token_hint subject differs from the session owner"
                );
                hint_matches_session = false;
            }
        }
        let linked = state.sessions.rp_clients(session_id).await?;
        if state.sessions.terminate(session_id).await? {
            tracing::info!(linked_clients = linked.len(), "IdP session terminated");
        }
    }
    // Another user's hint never signs that user out of their own sessions.
    if let Some(claims) = hint.as_ref().filter(|_| hint_matches_session) {
        let terminated = state.sessions.terminate_all_for_user(&claims.sub).await?;
        tracing::info!(user_id = %claims.sub, terminated, "User logged out of all sessions");
    }

    Ok(redirect)
}
