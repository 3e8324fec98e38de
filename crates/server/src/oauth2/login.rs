//! IdP login page and the session cookie it establishes.

use askama::Template;
use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use sea_orm::DbErr;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::entity::oauth2_session;
use crate::oauth2::sessions::SESSION_COOKIE;
use crate::oauth2::views::{render, render_error};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    return_to: String,
    email: String,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Local authorization request to resume after sign-in
    pub return_to: Option<String>,
}

/// Form data for login submission.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub return_to: String,
}

/// The active session named by the request's session cookie, if any.
pub async fn current_session(
    state: &OAuth2State,
    jar: &CookieJar,
) -> Result<Option<oauth2_session::Model>, DbErr> {
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.sessions.get_active(cookie.value()).await,
        None => Ok(None),
    }
}

pub(crate) fn session_cookie(state: &OAuth2State, session_id: String) -> Cookie<'static> {
    let max_age = time::Duration::seconds(state.config.session_lifetime);
    Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.secure_cookies)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Only resume local authorization requests; anything else is an open redirect.
fn is_safe_return_to(return_to: &str) -> bool {
    return_to.starts_with("/oauth2/authorize") && !return_to.starts_with("//")
}

fn login_page_with(return_to: String, email: String, error: Option<String>) -> Response {
    let status = if error.is_some() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };
    let template = LoginTemplate {
        return_to,
        email,
        error,
        message: None,
    };
    (status, render(&template)).into_response()
}

/// Display the login page.
#[tracing::instrument(skip(params))]
#[utoipa::path(
    get,
    path = "/oauth2/login",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Login Page",
    summary = "Display the IdP login page",
    description = "Renders the email/password form. The authorization endpoint redirects here \
                   when the browser has no active IdP session.",
    params(LoginQuery),
    responses(
        (status = 200, description = "Login page HTML"),
    )
)]
pub async fn login_page(Query(params): Query<LoginQuery>) -> Response {
    let return_to = params
        .return_to
        .filter(|r| is_safe_return_to(r))
        .unwrap_or_default();
    login_page_with(return_to, String::new(), None)
}

/// Handle login form submission.
#[tracing::instrument(skip(state, jar, form), fields(email = %form.email))]
#[utoipa::path(
    post,
    path = "/oauth2/login",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Login Submit",
    summary = "Submit login credentials",
    description = "Authenticates the user with email and password, starts an IdP session \
                   (HttpOnly, SameSite=Lax cookie) and resumes the pending authorization request.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Login credentials"
    ),
    responses(
        (status = 303, description = "Signed in, redirect back to the authorization endpoint"),
        (status = 200, description = "Signed in without a pending authorization request"),
        (status = 401, description = "Login page HTML with an error"),
    )
)]
pub async fn login_submit(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let return_to = if is_safe_return_to(&form.return_to) {
        form.return_to
    } else {
        String::new()
    };

    let user = match state.users.authenticate(&form.email, &form.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::info!("Failed login attempt");
            return login_page_with(
                return_to,
                form.email,
                Some("Invalid email or password".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("Login lookup failed: {}", e);
            return render_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.",
            );
        }
    };

    if !user.email_verified {
        return login_page_with(
            return_to,
            form.email,
            Some("Please verify your email address before signing in".to_string()),
        );
    }

    let session = match state.users.touch_last_login(user).await {
        Ok(user) => state.sessions.create(&user.id).await,
        Err(e) => Err(e),
    };
    let session = match session {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start session: {}", e);
            return render_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.",
            );
        }
    };
    tracing::info!(user_id = %session.user_id, "User signed in");

    let jar = jar.add(session_cookie(&state, session.id));
    if return_to.is_empty() {
        let template = LoginTemplate {
            return_to,
            email: String::new(),
            error: None,
            message: Some("You are signed in.".to_string()),
        };
        return (jar, render(&template)).into_response();
    }
    (jar, Redirect::to(&return_to)).into_response()
}
