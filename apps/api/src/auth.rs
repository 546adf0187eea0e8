//! JWT auth extraction.
//!
//! The API trusts HS256 bearer tokens carrying `{sub, roles}`; issuance is
//! the identity service's job. Handlers take [`CurrentUser`] (any valid
//! token) or [`AdminUser`] (requires the `admin` role) as extractor
//! arguments and never touch headers themselves.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

/// JWT claims this API understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Role names, e.g. `["customer"]` or `["customer", "admin"]`.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiry (unix seconds), validated by jsonwebtoken.
    pub exp: i64,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

/// Strips the `Bearer ` prefix, case-insensitively.
fn token_from_header(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Decodes and validates a bearer token against the configured secret.
pub fn verify_token(token: &str, secret: &str) -> Result<CurrentUser, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ApiError::unauthorized("Token expired")
        }
        _ => ApiError::unauthorized("Invalid token"),
    })?;

    Ok(CurrentUser {
        id: data.claims.sub,
        roles: data.claims.roles,
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Reuse if a previous extractor already validated this request
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = token_from_header(header)
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header"))?;

        let user = verify_token(token, &state.config.jwt_secret)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// Extractor for admin-only routes.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden());
        }
        Ok(AdminUser(user))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, roles: &[&str], exp_offset: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_round_trip() {
        let user = verify_token(&token("u1", &["customer", "admin"], 3600), SECRET).unwrap();
        assert_eq!(user.id, "u1");
        assert!(user.is_admin());
    }

    #[test]
    fn test_expired_token_rejected() {
        let err = verify_token(&token("u1", &[], -3600), SECRET).unwrap_err();
        assert!(err.message.contains("expired"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        assert!(verify_token(&token("u1", &[], 3600), "other-secret").is_err());
    }

    #[test]
    fn test_bearer_prefix_parsing() {
        assert_eq!(token_from_header("Bearer abc"), Some("abc"));
        assert_eq!(token_from_header("bearer abc"), Some("abc"));
        assert_eq!(token_from_header("Basic abc"), None);
        assert_eq!(token_from_header("nonsense"), None);
    }
}
