//! Authentication middleware.
//!
//! Every data route is scoped to an owner taken from the Bearer token.
//! Without `AUTH_SECRET` the token is the owner id itself; with it, the
//! token must read `<owner>.<secret>`.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated owner extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub owner: String,
}

/// Resolve the owner named by an `Authorization` header value.
pub fn owner_from_header(
    header: Option<&str>,
    secret: Option<&str>,
) -> Result<String, &'static str> {
    let header = header.ok_or("Missing authorization header")?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or("Invalid authorization header format")?
        .trim();
    if token.is_empty() {
        return Err("Empty bearer token");
    }

    let owner = match secret {
        Some(secret) => match token.rsplit_once('.') {
            Some((owner, given)) if given == secret => owner,
            _ => return Err("Invalid bearer token"),
        },
        None => token,
    };

    if owner.is_empty() {
        return Err("Invalid bearer token");
    }
    Ok(owner.to_string())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match owner_from_header(header, state.config.auth_secret.as_deref()) {
            Ok(owner) => Ok(AuthUser { owner }),
            Err(reason) => {
                tracing::debug!(reason, "Rejecting request");
                Err(AppError::Unauthorized(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_owner_without_secret() {
        assert_eq!(
            owner_from_header(Some("Bearer owner-1"), None),
            Ok("owner-1".to_string())
        );
    }

    #[test]
    fn secret_suffix_is_checked() {
        assert_eq!(
            owner_from_header(Some("Bearer owner-1.s3cret"), Some("s3cret")),
            Ok("owner-1".to_string())
        );
        assert_eq!(
            owner_from_header(Some("Bearer user.name.s3cret"), Some("s3cret")),
            Ok("user.name".to_string())
        );
        assert!(owner_from_header(Some("Bearer owner-1.wrong"), Some("s3cret")).is_err());
        assert!(owner_from_header(Some("Bearer owner-1"), Some("s3cret")).is_err());
        assert!(owner_from_header(Some("Bearer .s3cret"), Some("s3cret")).is_err());
    }

    #[test]
    fn malformed_headers() {
        assert!(owner_from_header(None, None).is_err());
        assert!(owner_from_header(Some("Basic abc"), None).is_err());
        assert!(owner_from_header(Some("Bearer "), None).is_err());
        assert!(owner_from_header(Some("Bearer    "), None).is_err());
    }
}
