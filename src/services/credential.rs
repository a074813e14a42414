//! Bearer credential extraction

use http::header::AUTHORIZATION;
use http::HeaderMap;

use crate::error::{AuthError, AuthResult};

/// Pull the bearer token out of the inbound `Authorization` header
///
/// The value must be exactly `Bearer <token>`: one space, a non-empty token,
/// nothing else.
///
/// # Errors
///
/// Returns `Unauthorized` for an absent, non UTF-8 or malformed header
pub fn extract_bearer(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::unauthorized("Authorization header is not valid UTF-8"))?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::unauthorized("wrong Authorization header format")),
    }
}
