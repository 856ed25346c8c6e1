// Strict semantic validation of verified claims
// Runs after the codec. Everything the codec cannot know (configured issuer,
// audience per token use, grant rules) is enforced here, producing the
// canonical claims used throughout the core.

use std::sync::Arc;
use thiserror::Error;

use crate::models::auth::{JwtClaims, TokenUse};
use crate::services::jwt::{JwtError, TokenCodec};
use crate::utils::auth_errors::codes;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error(transparent)]
    Jwt(#[from] JwtError),

    #[error("issuer mismatch")]
    BadIssuer,

    #[error("missing or blank claim `{0}`")]
    MissingClaim(&'static str),

    #[error("audience does not match token use")]
    BadAudience,

    #[error("expected {expected} token, got {actual}")]
    BadTokenUse {
        expected: TokenUse,
        actual: TokenUse,
    },

    #[error("refresh token carries roles or scopes")]
    RefreshCarriesGrants,
}

impl TokenValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            TokenValidationError::Jwt(JwtError::Expired) => codes::JWT_EXPIRED,
            TokenValidationError::Jwt(JwtError::UnknownKid(_)) => codes::JWT_UNKNOWN_KID,
            TokenValidationError::Jwt(JwtError::BadSignature) => codes::JWT_BAD_SIGNATURE,
            TokenValidationError::Jwt(_) => codes::JWT_INVALID,
            TokenValidationError::BadIssuer => codes::JWT_BAD_ISSUER,
            TokenValidationError::MissingClaim(_) => codes::JWT_MISSING_CLAIM,
            TokenValidationError::BadAudience => codes::JWT_BAD_AUDIENCE,
            TokenValidationError::BadTokenUse { .. } => codes::JWT_BAD_TYPE,
            TokenValidationError::RefreshCarriesGrants => codes::JWT_INVALID,
        }
    }
}

/// Validates claims against the configured issuer and audiences.
pub struct StrictTokenValidator {
    codec: Arc<TokenCodec>,
    access_audience: String,
    refresh_audience: String,
}

impl StrictTokenValidator {
    pub fn new(
        codec: Arc<TokenCodec>,
        access_audience: impl Into<String>,
        refresh_audience: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            access_audience: access_audience.into(),
            refresh_audience: refresh_audience.into(),
        }
    }

    /// Full validation: cryptographic + temporal (codec), then semantic.
    pub fn validate(&self, token: &str) -> Result<JwtClaims, TokenValidationError> {
        let claims = self.codec.verify(token)?;
        self.check_semantics(&claims)?;
        Ok(claims)
    }

    /// Validate and require an access token.
    pub fn validate_access(&self, token: &str) -> Result<JwtClaims, TokenValidationError> {
        let claims = self.validate(token)?;
        if claims.token_use != TokenUse::Access {
            return Err(TokenValidationError::BadTokenUse {
                expected: TokenUse::Access,
                actual: claims.token_use,
            });
        }
        Ok(claims)
    }

    /// Validate and require a refresh token.
    pub fn validate_refresh(&self, token: &str) -> Result<JwtClaims, TokenValidationError> {
        let claims = self.validate(token)?;
        if claims.token_use != TokenUse::Refresh {
            return Err(TokenValidationError::BadTokenUse {
                expected: TokenUse::Refresh,
                actual: claims.token_use,
            });
        }
        Ok(claims)
    }

    fn check_semantics(&self, claims: &JwtClaims) -> Result<(), TokenValidationError> {
        if claims.iss != self.codec.issuer() {
            return Err(TokenValidationError::BadIssuer);
        }
        if claims.sub.trim().is_empty() {
            return Err(TokenValidationError::MissingClaim("sub"));
        }
        if claims.jti.trim().is_empty() {
            return Err(TokenValidationError::MissingClaim("jti"));
        }
        if claims.aud.is_empty() {
            return Err(TokenValidationError::MissingClaim("aud"));
        }

        let expected_audience = match claims.token_use {
            TokenUse::Access => &self.access_audience,
            TokenUse::Refresh => &self.refresh_audience,
        };
        if !claims.has_audience(expected_audience) {
            return Err(TokenValidationError::BadAudience);
        }

        if claims.token_use == TokenUse::Refresh
            && (!claims.roles.is_empty() || !claims.scopes.is_empty())
        {
            return Err(TokenValidationError::RefreshCarriesGrants);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jwt::MintSpec;
    use crate::services::keys::{KeyMaterial, KeyMaterialConfig, KeySource};
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    const TEST_SECRET: &str =
        "unit-test-hmac-secret-that-is-long-enough-for-the-sixty-four-byte-floor";

    fn codec(issuer: &str) -> Arc<TokenCodec> {
        let keys = Arc::new(
            KeyMaterial::from_config(&KeyMaterialConfig {
                source: KeySource::Hmac {
                    secret: TEST_SECRET.to_string(),
                },
                active_kid: "k1".to_string(),
                verification_kids: vec!["k1".to_string()],
            })
            .unwrap(),
        );
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        Arc::new(TokenCodec::new(keys, issuer, 0, Arc::new(clock)))
    }

    fn validator(codec: Arc<TokenCodec>) -> StrictTokenValidator {
        StrictTokenValidator::new(codec, "api.example.com", "refresh.example.com")
    }

    fn mint_access(codec: &TokenCodec) -> String {
        codec
            .mint(MintSpec {
                subject: "admin".to_string(),
                roles: vec!["ROLE_ADMIN".to_string()],
                scopes: vec!["user:manage".to_string()],
                ttl_seconds: 900,
                audience: "api.example.com".to_string(),
                token_use: TokenUse::Access,
            })
            .unwrap()
            .token
    }

    #[test]
    fn valid_access_token_passes() {
        let codec = codec("auth.example.com");
        let token = mint_access(&codec);
        let claims = validator(codec).validate_access(&token).unwrap();
        assert_eq!(claims.sub, "admin");
    }

    #[test]
    fn issuer_mismatch_is_rejected() {
        let minter = codec("rogue.example.com");
        let token = mint_access(&minter);

        // Verifier trusts the same key but expects a different issuer
        let verifier = codec("auth.example.com");
        assert_eq!(
            validator(verifier).validate(&token),
            Err(TokenValidationError::BadIssuer)
        );
    }

    #[test]
    fn wrong_audience_for_token_use_is_rejected() {
        let codec_arc = codec("auth.example.com");
        // Access token stamped with the refresh audience
        let token = codec_arc
            .mint(MintSpec {
                subject: "admin".to_string(),
                roles: vec![],
                scopes: vec![],
                ttl_seconds: 900,
                audience: "refresh.example.com".to_string(),
                token_use: TokenUse::Access,
            })
            .unwrap()
            .token;

        assert_eq!(
            validator(codec_arc).validate(&token),
            Err(TokenValidationError::BadAudience)
        );
    }

    #[test]
    fn blank_subject_is_rejected() {
        let codec_arc = codec("auth.example.com");
        let token = codec_arc
            .mint(MintSpec {
                subject: "   ".to_string(),
                roles: vec![],
                scopes: vec![],
                ttl_seconds: 900,
                audience: "api.example.com".to_string(),
                token_use: TokenUse::Access,
            })
            .unwrap()
            .token;

        assert_eq!(
            validator(codec_arc).validate(&token),
            Err(TokenValidationError::MissingClaim("sub"))
        );
    }

    #[test]
    fn access_token_rejected_where_refresh_expected() {
        let codec_arc = codec("auth.example.com");
        let token = mint_access(&codec_arc);

        assert!(matches!(
            validator(codec_arc).validate_refresh(&token),
            Err(TokenValidationError::BadTokenUse {
                expected: TokenUse::Refresh,
                actual: TokenUse::Access,
            })
        ));
    }

    #[test]
    fn refresh_token_passes_refresh_validation() {
        let codec_arc = codec("auth.example.com");
        let token = codec_arc
            .mint(MintSpec {
                subject: "admin".to_string(),
                roles: vec!["ROLE_ADMIN".to_string()],
                scopes: vec![],
                ttl_seconds: 3600,
                audience: "refresh.example.com".to_string(),
                token_use: TokenUse::Refresh,
            })
            .unwrap()
            .token;

        // The codec strips grants from refresh tokens, so this validates
        let claims = validator(codec_arc).validate_refresh(&token).unwrap();
        assert!(claims.roles.is_empty());
        assert!(claims.scopes.is_empty());
    }

    #[test]
    fn error_codes_map_per_kind() {
        assert_eq!(
            TokenValidationError::Jwt(JwtError::Expired).error_code(),
            codes::JWT_EXPIRED
        );
        assert_eq!(
            TokenValidationError::Jwt(JwtError::UnknownKid("k9".into())).error_code(),
            codes::JWT_UNKNOWN_KID
        );
        assert_eq!(TokenValidationError::BadIssuer.error_code(), codes::JWT_BAD_ISSUER);
        assert_eq!(
            TokenValidationError::BadAudience.error_code(),
            codes::JWT_BAD_AUDIENCE
        );
    }
}
