//! Consent screen: shows what an application is asking for and records the
//! user's decision.

use askama::Template;
use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::ProtocolError;
use crate::oauth2::claims::parse_scope;
use crate::oauth2::clients::RESPONSE_TYPE_CODE;
use crate::oauth2::endpoints::{AuthorizeRequest, error_redirect, resolve_client};
use crate::oauth2::login::current_session;
use crate::oauth2::secret::constant_time_eq;
use crate::oauth2::views::{ScopeInfo, render, render_error, scope_info};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};

/// Authorization parameters carried through the consent form.
struct PendingRequest {
    client_id: String,
    redirect_uri: String,
    scope: String,
    state: Option<String>,
    nonce: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

#[derive(Template)]
#[template(path = "consent.html")]
struct ConsentTemplate {
    client_name: String,
    user_email: String,
    scopes: Vec<ScopeInfo>,
    csrf_token: String,
    request: PendingRequest,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentForm {
    pub csrf_token: String,
    /// `approve` or `deny`
    pub action: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl ConsentForm {
    fn authorize_request(&self) -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some(RESPONSE_TYPE_CODE.to_string()),
            client_id: Some(self.client_id.clone()),
            redirect_uri: Some(self.redirect_uri.clone()),
            scope: Some(self.scope.clone()),
            state: self.state.clone(),
            nonce: self.nonce.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
            prompt: None,
        }
    }
}

/// Display the consent page.
#[tracing::instrument(skip(state, jar, params), fields(client_id = ?params.client_id))]
#[utoipa::path(
    get,
    path = "/oauth2/consent",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Consent Page",
    summary = "Display the consent page",
    description = "Shows the client name and a human-readable description of each requested scope. \
                   Requires an active IdP session.",
    params(AuthorizeRequest),
    responses(
        (status = 200, description = "Consent page HTML"),
        (status = 303, description = "No session, redirect to the login page"),
        (status = 400, description = "Invalid client, redirect URI or scope"),
    )
)]
pub async fn consent_page(
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

    let session = match current_session(&state, &jar).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            let return_to = urlencoding::encode(&params.authorize_path()).into_owned();
            return Redirect::to(&format!("/oauth2/login?return_to={return_to}")).into_response();
        }
        Err(e) => return ProtocolError::from(e).into_response(),
    };
    let user = match state.users.find_by_id(&session.user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return render_error(
                StatusCode::UNAUTHORIZED,
                "Your session has ended. Please sign in again.",
            );
        }
        Err(e) => return ProtocolError::from(e).into_response(),
    };

    let scope = params.scope.clone().unwrap_or_default();
    let scopes = parse_scope(&scope);
    if scopes.is_empty() || !client.can_request_scope(&scopes) {
        return render_error(
            StatusCode::BAD_REQUEST,
            "The application requested an invalid scope.",
        );
    }

    let template = ConsentTemplate {
        client_name: client.name,
        user_email: user.email,
        scopes: scopes.iter().map(|s| scope_info(s)).collect(),
        csrf_token: session.csrf_token,
        request: PendingRequest {
            client_id: client.client_id,
            redirect_uri,
            scope,
            state: params.state,
            nonce: params.nonce,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
        },
    };
    render(&template)
}

/// Handle the consent decision.
#[tracing::instrument(
    skip(state, jar, form),
    fields(client_id = %form.client_id, action = %form.action)
)]
#[utoipa::path(
    post,
    path = "/oauth2/consent",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Consent Submit",
    summary = "Approve or deny an authorization request",
    description = "`approve` records consent for the requested scopes (merged with any earlier grant) \
                   and resumes the authorization request. `deny` redirects to the client with `access_denied`.",
    request_body(
        content = ConsentForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Consent decision"
    ),
    responses(
        (status = 303, description = "Redirect to the authorization endpoint or the client"),
        (status = 400, description = "Invalid client or redirect URI"),
        (status = 403, description = "Missing session or CSRF token mismatch"),
    )
)]
pub async fn consent_submit(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(form): Form<ConsentForm>,
) -> Response {
    let (client, redirect_uri) =
        match resolve_client(&state, Some(&form.client_id), Some(&form.redirect_uri)).await {
            Ok(resolved) => resolved,
            Err(response) => return response,
        };

    let session = match current_session(&state, &jar).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return render_error(
                StatusCode::FORBIDDEN,
                "Your session has ended. Please sign in again.",
            );
        }
        Err(e) => return ProtocolError::from(e).into_response(),
    };
    if !constant_time_eq(&form.csrf_token, &session.csrf_token) {
        tracing::warn!(user_id = %session.user_id, "Consent CSRF token mismatch");
        return render_error(StatusCode::FORBIDDEN, "The request could not be verified.");
    }

    match form.action.as_str() {
        "approve" => {
            let scopes = parse_scope(&form.scope);
            if scopes.is_empty() || !client.can_request_scope(&scopes) {
                return error_redirect(
                    &redirect_uri,
                    form.state.as_deref(),
                    &ProtocolError::invalid_scope("Requested scope is not allowed for this client"),
                );
            }
            if let Err(e) = state
                .consents
                .grant(&session.user_id, &client.client_id, &scopes)
                .await
            {
                return error_redirect(
                    &redirect_uri,
                    form.state.as_deref(),
                    &ProtocolError::from(e),
                );
            }
            Redirect::to(&form.authorize_request().authorize_path()).into_response()
        }
        _ => {
            tracing::info!(user_id = %session.user_id, "Consent denied");
            error_redirect(
                &redirect_uri,
                form.state.as_deref(),
                &ProtocolError::access_denied("User denied the request"),
            )
        }
    }
}
