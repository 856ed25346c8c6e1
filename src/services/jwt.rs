// JWT mint/verify codec
// Cryptographic and temporal validation only; semantic claim checks live in
// the strict validator. Temporal checks read the injected clock with zero
// leeway unless a skew is configured explicitly.

use jsonwebtoken::{decode, decode_header, encode, DecodingKey, Header, Validation};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{JwtClaims, TokenUse};
use crate::services::keys::KeyMaterial;
use crate::utils::clock::SharedClock;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JwtError {
    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("unknown key id `{0}`")]
    UnknownKid(String),

    #[error("bad signature")]
    BadSignature,

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature => JwtError::BadSignature,
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => JwtError::BadSignature,
            _ => JwtError::Invalid,
        }
    }
}

/// Everything needed to mint one token.
#[derive(Debug, Clone)]
pub struct MintSpec {
    pub subject: String,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    pub ttl_seconds: u64,
    pub audience: String,
    pub token_use: TokenUse,
}

/// A signed token plus the claims it carries; callers need jti and exp
/// without re-parsing.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub claims: JwtClaims,
}

/// Stateless mint/verify codec over the loaded key material.
pub struct TokenCodec {
    keys: Arc<KeyMaterial>,
    issuer: String,
    clock_skew_seconds: u64,
    clock: SharedClock,
}

impl TokenCodec {
    pub fn new(
        keys: Arc<KeyMaterial>,
        issuer: impl Into<String>,
        clock_skew_seconds: u64,
        clock: SharedClock,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            clock_skew_seconds,
            clock,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a signed token. Refresh tokens never carry roles or scopes,
    /// whatever the caller passes.
    pub fn mint(&self, spec: MintSpec) -> Result<MintedToken, JwtError> {
        let now = self.clock.epoch_seconds();

        let (roles, scopes) = match spec.token_use {
            TokenUse::Access => (spec.roles, spec.scopes),
            TokenUse::Refresh => (Vec::new(), Vec::new()),
        };

        let claims = JwtClaims {
            sub: spec.subject,
            jti: Uuid::new_v4().to_string(),
            aud: vec![spec.audience],
            iat: now,
            nbf: now,
            exp: now + spec.ttl_seconds,
            iss: self.issuer.clone(),
            roles,
            scopes,
            token_use: spec.token_use,
        };

        let mut header = Header::new(self.keys.algorithm());
        header.kid = Some(self.keys.active_kid().to_string());

        let token = encode(&header, &claims, self.keys.signing_key())
            .map_err(|e| JwtError::Encoding(e.to_string()))?;

        Ok(MintedToken { token, claims })
    }

    /// Verify signature and temporal claims, returning the raw claims.
    pub fn verify(&self, token: &str) -> Result<JwtClaims, JwtError> {
        let header = decode_header(token).map_err(JwtError::from)?;
        let kid = header.kid.ok_or(JwtError::Invalid)?;

        let key = self
            .keys
            .verification_key(&kid)
            .ok_or_else(|| JwtError::UnknownKid(kid.clone()))?;

        let claims = self.decode_claims(token, key)?;

        let now = self.clock.epoch_seconds();
        let skew = self.clock_skew_seconds;

        // nbf == now is valid
        if claims.nbf > now + skew {
            return Err(JwtError::Invalid);
        }
        // exp == now is expired
        if now >= claims.exp + skew {
            return Err(JwtError::Expired);
        }

        Ok(claims)
    }

    pub fn extract_jti(&self, token: &str) -> Result<String, JwtError> {
        Ok(self.verify(token)?.jti)
    }

    pub fn extract_subject(&self, token: &str) -> Result<String, JwtError> {
        Ok(self.verify(token)?.sub)
    }

    fn decode_claims(&self, token: &str, key: &DecodingKey) -> Result<JwtClaims, JwtError> {
        // Temporal and audience checks are done by hand against the injected
        // clock; the library only verifies signature and shape here.
        let mut validation = Validation::new(self.keys.algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<JwtClaims>(token, key, &validation).map_err(JwtError::from)?;
        Ok(data.claims)
    }
}
