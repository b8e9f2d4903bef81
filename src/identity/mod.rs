//! Player identity: who the local player is

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::game::PlayerId;
use crate::util::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

/// Source of the stable id of the signed-in player
pub trait IdentityProvider: Send + Sync {
    fn current_player_id(&self) -> Result<PlayerId, AuthError>;
}

/// A fixed id, for practice runs and tests
#[derive(Debug, Clone)]
pub struct StaticIdentity(PlayerId);

impl StaticIdentity {
    pub fn new(id: impl Into<PlayerId>) -> Self {
        Self(id.into())
    }

    /// A fresh random player
    pub fn random() -> Self {
        Self(PlayerId::from(Uuid::new_v4()))
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_player_id(&self) -> Result<PlayerId, AuthError> {
        Ok(self.0.clone())
    }
}

/// JWT claims from Supabase auth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub role: Option<String>,
}

/// Identity taken from a signed Supabase session token
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    claims: JwtClaims,
}

impl SessionIdentity {
    pub fn new(token: &str, secret: &str) -> Result<Self, AuthError> {
        let claims = verify_jwt(token, secret)?;
        Ok(Self { claims })
    }

    pub fn claims(&self) -> &JwtClaims {
        &self.claims
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_player_id(&self) -> Result<PlayerId, AuthError> {
        if self.claims.exp < unix_secs() {
            return Err(AuthError::TokenExpired);
        }
        Ok(PlayerId::from(self.claims.sub))
    }
}

/// Pick the identity source from configuration: a session token when one is
/// configured, otherwise a random practice player
pub fn from_config(config: &IdentityConfig) -> Result<Box<dyn IdentityProvider>, AuthError> {
    match (&config.session_token, &config.jwt_secret) {
        (Some(token), Some(secret)) => Ok(Box::new(SessionIdentity::new(token, secret)?)),
        (Some(_), None) => Err(AuthError::MissingSecret),
        (None, _) => Ok(Box::new(StaticIdentity::random())),
    }
}

/// Verify an HS256 token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims = serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_secs() {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Session token configured without a JWT secret")]
    MissingSecret,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "super-secret";

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", header, payload).as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}.{}", header, payload, signature)
    }

    fn claims(sub: Uuid, exp: u64) -> serde_json::Value {
        serde_json::json!({ "sub": sub, "exp": exp, "role": "authenticated" })
    }

    #[test]
    fn session_token_yields_the_subject() {
        let sub = Uuid::new_v4();
        let token = sign(&claims(sub, unix_secs() + 600), SECRET);

        let identity = SessionIdentity::new(&token, SECRET).unwrap();
        assert_eq!(identity.current_player_id().unwrap(), PlayerId::from(sub));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign(&claims(Uuid::new_v4(), unix_secs() + 600), "other");
        assert_eq!(verify_jwt(&token, SECRET).unwrap_err(), AuthError::InvalidToken);
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign(&claims(Uuid::new_v4(), unix_secs().saturating_sub(10)), SECRET);
        assert_eq!(verify_jwt(&token, SECRET).unwrap_err(), AuthError::TokenExpired);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["", "a.b", "a.b.c.d", "!!.??.**"] {
            assert_eq!(verify_jwt(token, SECRET).unwrap_err(), AuthError::InvalidToken);
        }
    }

    #[test]
    fn config_without_token_uses_a_static_player() {
        let identity = from_config(&IdentityConfig::default()).unwrap();
        let first = identity.current_player_id().unwrap();
        assert_eq!(identity.current_player_id().unwrap(), first);

        let half = IdentityConfig {
            jwt_secret: None,
            session_token: Some("x.y.z".into()),
        };
        assert_eq!(from_config(&half).err(), Some(AuthError::MissingSecret));
    }
}
