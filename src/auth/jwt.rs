//! JWT Token Handler
//! Mission: Issue and validate signed, time-bounded session tokens

use crate::auth::models::{Claims, User};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Why a token was rejected. Callers facing clients collapse all of these
/// into one generic message.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature or algorithm is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token is malformed")]
    Malformed,
    #[error("token could not be signed")]
    Signing,
}

const HMAC_ALGORITHMS: [&str; 3] = ["HS256", "HS384", "HS512"];

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime_secs: i64,
}

impl JwtHandler {
    /// Create a new JWT handler with secret key and token lifetime
    pub fn new(secret: &str, lifetime_hours: i64) -> Self {
        // Any HMAC variant is accepted, anything else (RS*, ES*, none) is not
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Time checks run against an explicit clock in `validate_at`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime_secs: lifetime_hours.saturating_mul(3600),
        }
    }

    /// Generate a JWT token for a user, returning it with its lifetime in seconds
    pub fn issue(&self, user: &User) -> Result<(String, i64), TokenError> {
        self.issue_at(user, Utc::now().timestamp())
    }

    pub fn issue_at(&self, user: &User, now: i64) -> Result<(String, i64), TokenError> {
        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            exp: now.saturating_add(self.lifetime_secs),
            iat: now,
            nbf: now,
            jti: Uuid::new_v4().simple().to_string(),
        };

        debug!(
            user_id = user.id,
            username = %user.username,
            expires_at = claims.exp,
            "Issuing JWT"
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Signing)?;

        Ok((token, self.lifetime_secs))
    }

    /// Validate a JWT token and extract claims
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now().timestamp())
    }

    /// Pure validation against a given unix time.
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        // jsonwebtoken reports names it has no variant for (`none`) as a JSON
        // error, so the algorithm is screened here first
        if let Some(alg) = header_algorithm(token) {
            if !HMAC_ALGORITHMS.contains(&alg.as_str()) {
                return Err(TokenError::SignatureInvalid);
            }
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => TokenError::SignatureInvalid,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                _ => TokenError::Malformed,
            })?
            .claims;

        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }

        Ok(claims)
    }
}

/// The `alg` named in the token header, if the header decodes at all
fn header_algorithm(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("alg")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;

    const SECRET: &str = "test-secret-key-12345";
    const T0: i64 = 1_700_000_000;

    fn create_test_user(role: UserRole) -> User {
        User {
            id: 42,
            username: "testuser".to_string(),
            email: "test@example.com".to_string(),
            password_hash: "hash".to_string(),
            role,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_jwt_generation_and_validation() {
        let handler = JwtHandler::new(SECRET, 24);
        let user = create_test_user(UserRole::User);

        let (token, expires_in) = handler.issue(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(expires_in, 24 * 3600);

        let claims = handler.validate(&token).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.username, user.username);
        assert_eq!(claims.role, user.role);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_lifetime_boundaries() {
        let handler = JwtHandler::new(SECRET, 1);
        let user = create_test_user(UserRole::Admin);
        let (token, lifetime) = handler.issue_at(&user, T0).unwrap();

        assert!(handler.validate_at(&token, T0).is_ok());
        assert!(handler.validate_at(&token, T0 + lifetime - 1).is_ok());
        assert_eq!(
            handler.validate_at(&token, T0 + lifetime),
            Err(TokenError::Expired)
        );
        assert_eq!(
            handler.validate_at(&token, T0 + lifetime + 3600),
            Err(TokenError::Expired)
        );
        assert_eq!(
            handler.validate_at(&token, T0 - 1),
            Err(TokenError::NotYetValid)
        );
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = JwtHandler::new(SECRET, 24);

        assert_eq!(
            handler.validate("invalid.token.here"),
            Err(TokenError::Malformed)
        );
        assert_eq!(handler.validate(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1", 24);
        let handler2 = JwtHandler::new("secret2", 24);
        let user = create_test_user(UserRole::User);

        let (token, _) = handler1.issue(&user).unwrap();

        assert_eq!(handler2.validate(&token), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let handler = JwtHandler::new(SECRET, 24);
        let user = create_test_user(UserRole::User);
        let (token, _) = handler.issue_at(&user, T0).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        claims["role"] = serde_json::json!("admin");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            handler.validate_at(&forged, T0),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_non_hmac_algorithm_rejected() {
        let handler = JwtHandler::new(SECRET, 24);
        let user = create_test_user(UserRole::User);
        let (token, _) = handler.issue_at(&user, T0).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let rs_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let confused = format!("{}.{}.{}", rs_header, parts[1], parts[2]);

        assert_eq!(
            handler.validate_at(&confused, T0),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_alg_none_rejected_as_bad_signature() {
        let handler = JwtHandler::new(SECRET, 24);
        let user = create_test_user(UserRole::Admin);
        let (token, _) = handler.issue_at(&user, T0).unwrap();

        let payload = token.split('.').nth(1).unwrap();
        for alg in ["none", "None", "XS999"] {
            let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{alg}","typ":"JWT"}}"#));
            let unsigned = format!("{header}.{payload}.");
            assert_eq!(
                handler.validate_at(&unsigned, T0),
                Err(TokenError::SignatureInvalid),
                "alg {alg}"
            );
        }
    }

    #[test]
    fn test_huge_lifetime_does_not_overflow() {
        let handler = JwtHandler::new(SECRET, i64::MAX);
        let user = create_test_user(UserRole::User);

        let (token, lifetime) = handler.issue_at(&user, T0).unwrap();
        assert_eq!(lifetime, i64::MAX);

        let claims = handler.validate_at(&token, T0).unwrap();
        assert_eq!(claims.exp, i64::MAX);
    }

    #[test]
    fn test_other_hmac_variant_accepted() {
        let handler = JwtHandler::new(SECRET, 24);
        let claims = Claims {
            user_id: 1,
            username: "hs512".to_string(),
            role: UserRole::User,
            exp: T0 + 60,
            iat: T0,
            nbf: T0,
            jti: "abc".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(handler.validate_at(&token, T0).unwrap(), claims);
    }

    #[test]
    fn test_tokens_are_unique_within_a_second() {
        let handler = JwtHandler::new(SECRET, 24);
        let user = create_test_user(UserRole::User);

        let (first, _) = handler.issue_at(&user, T0).unwrap();
        let (second, _) = handler.issue_at(&user, T0).unwrap();
        assert_ne!(first, second);
    }
}
