// Canonical JWT claim structures
// One claims shape for both token uses; refresh tokens carry no grants.

use serde::{Deserialize, Serialize};

/// Discriminates access tokens from refresh tokens on the wire
/// (`token_use` claim).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenUse {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "refresh")]
    Refresh,
}

impl TokenUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenUse::Access => "access",
            TokenUse::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenUse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by every token this service mints.
///
/// `sub`, `jti`, `aud`, `exp` and `token_use` are mandatory; `roles` and
/// `scopes` are empty exactly when `token_use` is refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtClaims {
    /// Subject (username)
    pub sub: String,

    /// JWT ID, globally unique per minted token (UUIDv4)
    pub jti: String,

    /// Audience list
    pub aud: Vec<String>,

    /// Issued at (Unix epoch seconds)
    pub iat: u64,

    /// Not before (equals iat at mint time)
    pub nbf: u64,

    /// Expires at (Unix epoch seconds)
    pub exp: u64,

    /// Issuer
    pub iss: String,

    /// Role names granted to the subject (access tokens only)
    #[serde(default)]
    pub roles: Vec<String>,

    /// Resolved `resource:action` scopes (access tokens only)
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Token use discriminator
    pub token_use: TokenUse,
}

impl JwtClaims {
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|a| a == audience)
    }
}
