//! HTML rendering shared by the login, consent and logout pages.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::oauth2::claims::{
    SCOPE_EMAIL, SCOPE_OFFLINE_ACCESS, SCOPE_OPENID, SCOPE_PHONE, SCOPE_PROFILE, SCOPE_SCHOOL,
};

/// Scope information for display.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub name: String,
    pub description: String,
}

/// Get human-readable scope information.
pub fn scope_info(scope: &str) -> ScopeInfo {
    let (name, description) = match scope {
        SCOPE_OPENID => ("OpenID", "Verify your identity"),
        SCOPE_PROFILE => ("Profile", "Access your name and picture"),
        SCOPE_EMAIL => ("Email", "Access your email address"),
        SCOPE_PHONE => ("Phone", "Access your phone number"),
        SCOPE_SCHOOL => ("School", "Access your school and role"),
        SCOPE_OFFLINE_ACCESS => ("Offline access", "Stay signed in to the application"),
        _ => {
            return ScopeInfo {
                name: scope.to_string(),
                description: format!("Access to {scope}"),
            };
        }
    };
    ScopeInfo {
        name: name.to_string(),
        description: description.to_string(),
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    message: &'a str,
}

/// Render a template, or a bare 500 when rendering fails.
pub fn render<T: Template>(template: &T) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("Failed to render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Render a simple error page.
pub fn render_error(status: StatusCode, message: &str) -> Response {
    (status, render(&ErrorTemplate { message })).into_response()
}
