use axum_extra::extract::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde::Deserialize;

use crate::error::ApiError;
use crate::settings::Settings;

/// `?token=` fallback for clients that cannot send headers (calendar apps).
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

pub type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

/// Accepts the bearer header when present, the query token otherwise.
pub fn verify_token(
    settings: &Settings,
    auth: BearerHeader,
    query: &TokenQuery,
) -> Result<(), ApiError> {
    let provided = match &auth {
        Some(TypedHeader(header)) => Some(header.token()),
        None => query.token.as_deref(),
    };
    match provided {
        Some(token) if token == settings.auth_token => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
    }
}
