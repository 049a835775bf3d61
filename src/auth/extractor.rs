// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};

use super::{AuthError, AuthenticatedUser, SessionClaims};
use crate::state::{AppState, AuthConfig};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Extractor for any authenticated user.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        let user = verify_token(token, &state.auth_config)?;
        Ok(Auth(user))
    }
}

/// Extractor that requires the admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AdminOnly(user))
    }
}

/// Verify a bearer token and build the caller from its claims.
pub fn verify_token(token: &str, config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    match config.jwt_secret.as_deref() {
        Some(secret) => verify_signed(token, secret, config.issuer.as_deref()),
        None => verify_development(token),
    }
}

fn verify_signed(
    token: &str,
    secret: &str,
    issuer: Option<&str>,
) -> Result<AuthenticatedUser, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::MalformedToken,
    })?;

    Ok(AuthenticatedUser::from_claims(token_data.claims))
}

/// Development verification: decode without a signature check.
///
/// WARNING: only for local development, never with real traffic.
fn verify_development(token: &str) -> Result<AuthenticatedUser, AuthError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<SessionClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?;
    let claims = token_data.claims;

    let now = chrono::Utc::now().timestamp();
    if claims.exp > 0 && claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }

    Ok(AuthenticatedUser::from_claims(claims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::state::test_state;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn claims(user_id: &str, role: Option<&str>, exp: i64) -> SessionClaims {
        SessionClaims {
            sub: user_id.to_string(),
            iat: 1_609_459_200,
            exp,
            iss: Some("sessions".to_string()),
            sid: Some("sess_123".to_string()),
            role: role.map(str::to_string),
        }
    }

    fn sign(claims: &SessionClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn parts_with_token(token: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/test");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn auth_extractor_requires_auth_header() {
        let (state, _dir) = test_state();
        let mut parts = parts_with_token(None);

        let result = Auth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::MissingAuthHeader)));
    }

    #[tokio::test]
    async fn development_mode_accepts_unsigned_claims() {
        let (state, _dir) = test_state();
        let token = sign(&claims("user_123", None, 9_999_999_999), "anything");
        let mut parts = parts_with_token(Some(&token));

        let Auth(user) = Auth::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.user_id, "user_123");
        assert_eq!(user.role, Role::Client);
    }

    #[test]
    fn signed_mode_checks_signature_and_issuer() {
        let config = AuthConfig {
            jwt_secret: Some("top-secret".to_string()),
            issuer: Some("sessions".to_string()),
        };
        let good = sign(&claims("admin_1", Some("admin"), 9_999_999_999), "top-secret");
        let user = verify_token(&good, &config).unwrap();
        assert!(user.is_admin());

        let forged = sign(&claims("admin_1", Some("admin"), 9_999_999_999), "guess");
        assert!(matches!(
            verify_token(&forged, &config),
            Err(AuthError::InvalidSignature)
        ));

        let mut foreign = claims("admin_1", Some("admin"), 9_999_999_999);
        foreign.iss = Some("elsewhere".to_string());
        assert!(matches!(
            verify_token(&sign(&foreign, "top-secret"), &config),
            Err(AuthError::InvalidIssuer)
        ));
    }

    #[test]
    fn expired_tokens_are_rejected_in_both_modes() {
        let expired = claims("user_123", None, 1_609_459_200);
        let dev = AuthConfig::default();
        assert!(matches!(
            verify_token(&sign(&expired, "s"), &dev),
            Err(AuthError::TokenExpired)
        ));

        let signed = AuthConfig {
            jwt_secret: Some("s".to_string()),
            issuer: None,
        };
        assert!(matches!(
            verify_token(&sign(&expired, "s"), &signed),
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn admin_only_rejects_non_admin() {
        let (state, _dir) = test_state();
        let token = sign(&claims("user_123", Some("client"), 9_999_999_999), "x");
        let mut parts = parts_with_token(Some(&token));

        let result = AdminOnly::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::InsufficientPermissions)));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            verify_token("not-a-jwt", &AuthConfig::default()),
            Err(AuthError::MalformedToken)
        ));
    }
}
