//! Scope-gated identity claims.
//!
//! Each claim group is present only when its scope was granted; assembly is a
//! pure function of the user row and the scope list.

use serde::{Deserialize, Serialize};

use crate::entity::oauth2_user;

pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_PROFILE: &str = "profile";
pub const SCOPE_EMAIL: &str = "email";
pub const SCOPE_PHONE: &str = "phone";
pub const SCOPE_SCHOOL: &str = "school";
pub const SCOPE_OFFLINE_ACCESS: &str = "offline_access";

pub const SUPPORTED_SCOPES: &[&str] = &[
    SCOPE_OPENID,
    SCOPE_PROFILE,
    SCOPE_EMAIL,
    SCOPE_PHONE,
    SCOPE_SCHOOL,
    SCOPE_OFFLINE_ACCESS,
];

pub const SUPPORTED_CLAIMS: &[&str] = &[
    "sub",
    "iss",
    "aud",
    "exp",
    "iat",
    "auth_time",
    "nonce",
    "name",
    "given_name",
    "family_name",
    "picture",
    "email",
    "email_verified",
    "phone_number",
    "phone_number_verified",
    "school_id",
    "role",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailClaims {
    pub email: String,
    pub email_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneClaims {
    pub phone_number: String,
    pub phone_number_verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchoolClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// All identity claims a given scope set allows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopedClaims {
    #[serde(flatten)]
    pub profile: Option<ProfileClaims>,
    #[serde(flatten)]
    pub email: Option<EmailClaims>,
    #[serde(flatten)]
    pub phone: Option<PhoneClaims>,
    #[serde(flatten)]
    pub school: Option<SchoolClaims>,
}

pub fn has_scope<S: AsRef<str>>(scopes: &[S], scope: &str) -> bool {
    scopes.iter().any(|s| s.as_ref() == scope)
}

impl ScopedClaims {
    pub fn from_user<S: AsRef<str>>(user: &oauth2_user::Model, scopes: &[S]) -> Self {
        let profile = has_scope(scopes, SCOPE_PROFILE).then(|| ProfileClaims {
            name: user.name.clone(),
            given_name: user.given_name.clone(),
            family_name: user.family_name.clone(),
            picture: user.picture.clone(),
        });
        let email = has_scope(scopes, SCOPE_EMAIL).then(|| EmailClaims {
            email: user.email.clone(),
            email_verified: user.email_verified,
        });
        // A phone scope without a number on file yields nothing.
        let phone = if has_scope(scopes, SCOPE_PHONE) {
            user.phone_number.as_ref().map(|number| PhoneClaims {
                phone_number: number.clone(),
                phone_number_verified: user.phone_number_verified,
            })
        } else {
            None
        };
        let school = has_scope(scopes, SCOPE_SCHOOL).then(|| SchoolClaims {
            school_id: user.school_id.clone(),
            role: user.role.clone(),
        });

        Self {
            profile,
            email,
            phone,
            school,
        }
    }
}

/// Split and de-duplicate a space-separated scope parameter, keeping order.
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !out.iter().any(|existing| existing == s) {
            out.push(s.to_string());
        }
    }
    out
}
