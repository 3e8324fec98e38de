//! SeaORM entities for the identity provider's persisted state.

pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_consent;
pub mod oauth2_refresh_token;
pub mod oauth2_session;
pub mod oauth2_session_client;
pub mod oauth2_user;

/// Split a space-separated column into its entries.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}
