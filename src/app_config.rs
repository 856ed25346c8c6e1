// Centralized configuration
// Every environment variable is read exactly once at startup; the validation
// pipeline runs before the listener opens and any failure aborts the process.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::config::rate_limit::{RateLimitSettings, RateLimitStrategy};
use crate::config::scope_policy::ScopePolicy;
use crate::services::keys::{KeyMaterialConfig, KeySource, MIN_HMAC_SECRET_BYTES};

/// Floor for access-token lifetime; anything shorter is a config mistake.
const MIN_ACCESS_TTL_SECONDS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Environment type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
}

/// Redis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    pub pool_size: u32,
    pub connection_timeout: u64,
    pub command_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Where signing/verification keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySourceKind {
    Filesystem,
    Env,
    Hmac,
}

impl FromStr for KeySourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filesystem" => Ok(KeySourceKind::Filesystem),
            "env" => Ok(KeySourceKind::Env),
            "hmac" => Ok(KeySourceKind::Hmac),
            other => Err(format!("unknown key source `{}`", other)),
        }
    }
}

/// JWT settings
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub issuer: String,
    pub access_audience: String,
    pub refresh_audience: String,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub active_kid: String,
    pub verification_kids: Vec<String>,
    pub key_source: KeySourceKind,
    pub rsa_key_dir: Option<PathBuf>,
    pub rsa_private_key_pem: Option<String>,
    pub rsa_public_key_pems: HashMap<String, String>,
    pub hmac_secret: Option<String>,
    pub rotate_refresh_tokens: bool,
    pub clock_skew_seconds: u64,
}

impl JwtSettings {
    /// Assemble the key-loading config for startup.
    pub fn key_material_config(&self) -> Result<KeyMaterialConfig, ConfigError> {
        let source = match self.key_source {
            KeySourceKind::Filesystem => KeySource::Filesystem {
                key_dir: self.rsa_key_dir.clone().ok_or_else(|| {
                    ConfigError::MissingVar("JWT_RSA_KEY_DIR".to_string())
                })?,
            },
            KeySourceKind::Env => KeySource::Env {
                private_key_pem: self.rsa_private_key_pem.clone().ok_or_else(|| {
                    ConfigError::MissingVar("JWT_RSA_PRIVATE_KEY_PEM".to_string())
                })?,
                public_key_pems: self.rsa_public_key_pems.clone(),
            },
            KeySourceKind::Hmac => KeySource::Hmac {
                secret: self
                    .hmac_secret
                    .clone()
                    .ok_or_else(|| ConfigError::MissingVar("JWT_HMAC_SECRET".to_string()))?,
            },
        };

        Ok(KeyMaterialConfig {
            source,
            active_kid: self.active_kid.clone(),
            verification_kids: self.verification_kids.clone(),
        })
    }
}

/// Network trust settings
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub trusted_proxy_cidrs: Vec<IpNetwork>,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub environment: Environment,
    pub rust_log: String,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub jwt: JwtSettings,
    pub rate_limit: RateLimitSettings,
    pub network: NetworkSettings,
    pub cors_allowed_origins: Vec<String>,
    /// Optional `{"ROLE_X": ["res:action"]}` document overriding the
    /// built-in role declarations
    pub role_scopes_json: Option<String>,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let get_required = |key: &str| -> Result<String, ConfigError> {
            env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
        };

        let get_or_default = |key: &str, default: &str| -> String {
            env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_u32 = |key: &str, default: &str| -> Result<u32, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u32".to_string())
            })
        };

        let parse_u64 = |key: &str, default: &str| -> Result<u64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u64".to_string())
            })
        };

        let parse_bool = |key: &str, default: &str| -> bool {
            get_or_default(key, default).to_lowercase() == "true"
        };

        let parse_list = |raw: String| -> Vec<String> {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        };

        let environment = Environment::from(get_or_default("ENVIRONMENT", "development"));

        let verification_kids = parse_list(get_required("JWT_VERIFICATION_KIDS")?);
        let active_kid = get_required("JWT_ACTIVE_KID")?;

        let key_source = get_or_default("JWT_KEY_SOURCE", "filesystem")
            .parse::<KeySourceKind>()
            .map_err(|e| ConfigError::InvalidValue("JWT_KEY_SOURCE".to_string(), e))?;

        // Per-kid public keys for the env source:
        // JWT_RSA_PUBLIC_KEY_PEM_<KID> with `-` mapped to `_`
        let mut rsa_public_key_pems = HashMap::new();
        for kid in &verification_kids {
            let var = format!(
                "JWT_RSA_PUBLIC_KEY_PEM_{}",
                kid.to_uppercase().replace('-', "_")
            );
            if let Ok(pem) = env::var(&var) {
                rsa_public_key_pems.insert(kid.clone(), pem);
            }
        }

        let trusted_proxy_cidrs = parse_list(get_or_default("TRUSTED_PROXY_CIDRS", ""))
            .into_iter()
            .map(|raw| {
                raw.parse::<IpNetwork>().map_err(|_| {
                    ConfigError::InvalidValue("TRUSTED_PROXY_CIDRS".to_string(), raw)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rate_limit = RateLimitSettings {
            enabled: parse_bool("RATE_LIMIT_ENABLED", "true"),
            strategy: get_or_default("RATE_LIMIT_STRATEGY", "IP_USER")
                .parse::<RateLimitStrategy>()
                .map_err(|e| ConfigError::InvalidValue("RATE_LIMIT_STRATEGY".to_string(), e))?,
            max_attempts: parse_u32("RATE_LIMIT_MAX_ATTEMPTS", "3")?,
            window_seconds: parse_u32("RATE_LIMIT_WINDOW_SECONDS", "60")?,
            block_seconds: parse_u32("RATE_LIMIT_BLOCK_SECONDS", "60")?,
            login_path: get_or_default("RATE_LIMIT_LOGIN_PATH", "/auth/login"),
        };

        Ok(AppConfig {
            bind_address: get_or_default("BIND_ADDRESS", "0.0.0.0:8080"),
            environment,
            rust_log: get_or_default(
                "RUST_LOG",
                "authgate_core=debug,axum=info,tower_http=info",
            ),
            database: DatabaseSettings {
                url: get_required("DATABASE_URL")?,
                max_connections: parse_u32("DATABASE_MAX_CONNECTIONS", "16")?,
                min_connections: parse_u32("DATABASE_MIN_CONNECTIONS", "2")?,
                connect_timeout: parse_u64("DATABASE_CONNECT_TIMEOUT", "10")?,
            },
            redis: RedisSettings {
                url: get_required("REDIS_URL")?,
                pool_size: parse_u32("REDIS_POOL_SIZE", "8")?,
                connection_timeout: parse_u64("REDIS_CONNECTION_TIMEOUT", "5")?,
                command_timeout: parse_u64("REDIS_COMMAND_TIMEOUT", "2")?,
                retry_attempts: parse_u32("REDIS_RETRY_ATTEMPTS", "3")?,
                retry_delay_ms: parse_u64("REDIS_RETRY_DELAY_MS", "100")?,
            },
            jwt: JwtSettings {
                issuer: get_required("JWT_ISSUER")?,
                access_audience: get_required("JWT_ACCESS_AUDIENCE")?,
                refresh_audience: get_required("JWT_REFRESH_AUDIENCE")?,
                access_ttl_seconds: parse_u64("JWT_ACCESS_TTL_SECONDS", "900")?,
                refresh_ttl_seconds: parse_u64("JWT_REFRESH_TTL_SECONDS", "604800")?,
                active_kid,
                verification_kids,
                key_source,
                rsa_key_dir: env::var("JWT_RSA_KEY_DIR").ok().map(PathBuf::from),
                rsa_private_key_pem: env::var("JWT_RSA_PRIVATE_KEY_PEM").ok(),
                rsa_public_key_pems,
                hmac_secret: env::var("JWT_HMAC_SECRET").ok(),
                rotate_refresh_tokens: parse_bool("JWT_ROTATE_REFRESH_TOKENS", "true"),
                clock_skew_seconds: parse_u64("JWT_CLOCK_SKEW_SECONDS", "0")?,
            },
            rate_limit,
            network: NetworkSettings {
                trusted_proxy_cidrs,
            },
            cors_allowed_origins: parse_list(get_or_default("CORS_ALLOWED_ORIGINS", "")),
            role_scopes_json: env::var("ROLE_SCOPES_JSON").ok(),
        })
    }

    /// Startup validation pipeline. Runs every check and reports the first
    /// failure; callers abort the process on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_jwt()?;
        self.validate_keys()?;
        self.validate_rate_limit()?;
        self.validate_network()?;
        self.validate_cors()?;
        self.validate_role_policy()?;
        Ok(())
    }

    fn validate_jwt(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;

        if jwt.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("JWT issuer must not be empty".into()));
        }
        if jwt.access_audience.trim().is_empty() || jwt.refresh_audience.trim().is_empty() {
            return Err(ConfigError::Invalid("JWT audiences must not be empty".into()));
        }
        if jwt.access_audience == jwt.refresh_audience {
            return Err(ConfigError::Invalid(
                "access and refresh audiences must differ".into(),
            ));
        }
        if jwt.access_ttl_seconds < MIN_ACCESS_TTL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "access token TTL {}s is below the {}s floor",
                jwt.access_ttl_seconds, MIN_ACCESS_TTL_SECONDS
            )));
        }
        if jwt.refresh_ttl_seconds <= jwt.access_ttl_seconds {
            return Err(ConfigError::Invalid(
                "refresh token TTL must exceed the access token TTL".into(),
            ));
        }
        if jwt.active_kid.trim().is_empty() {
            return Err(ConfigError::Invalid("active kid must not be empty".into()));
        }
        if !jwt.verification_kids.contains(&jwt.active_kid) {
            return Err(ConfigError::Invalid(format!(
                "active kid `{}` is not among the verification kids",
                jwt.active_kid
            )));
        }
        Ok(())
    }

    fn validate_keys(&self) -> Result<(), ConfigError> {
        match self.jwt.key_source {
            KeySourceKind::Hmac => {
                if self.is_production() {
                    return Err(ConfigError::Invalid(
                        "HMAC signing is not allowed in production; configure RSA keys".into(),
                    ));
                }
                let secret = self
                    .jwt
                    .hmac_secret
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingVar("JWT_HMAC_SECRET".to_string()))?;
                if secret.len() < MIN_HMAC_SECRET_BYTES {
                    return Err(ConfigError::Invalid(format!(
                        "HMAC secret is {} bytes, minimum is {}",
                        secret.len(),
                        MIN_HMAC_SECRET_BYTES
                    )));
                }
            },
            KeySourceKind::Filesystem => {
                if self.jwt.rsa_key_dir.is_none() {
                    return Err(ConfigError::MissingVar("JWT_RSA_KEY_DIR".to_string()));
                }
            },
            KeySourceKind::Env => {
                if self.jwt.rsa_private_key_pem.is_none() {
                    return Err(ConfigError::MissingVar(
                        "JWT_RSA_PRIVATE_KEY_PEM".to_string(),
                    ));
                }
                for kid in &self.jwt.verification_kids {
                    if !self.jwt.rsa_public_key_pems.contains_key(kid) {
                        return Err(ConfigError::Invalid(format!(
                            "no public key PEM configured for kid `{}`",
                            kid
                        )));
                    }
                }
            },
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        self.rate_limit
            .validate()
            .map_err(ConfigError::Invalid)
    }

    fn validate_network(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.network.trusted_proxy_cidrs.is_empty() {
            return Err(ConfigError::Invalid(
                "TRUSTED_PROXY_CIDRS must be configured in production".into(),
            ));
        }
        Ok(())
    }

    fn validate_cors(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.cors_allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::Invalid(
                "wildcard CORS origin is not allowed in production".into(),
            ));
        }
        Ok(())
    }

    fn validate_role_policy(&self) -> Result<(), ConfigError> {
        if let Some(raw) = &self.role_scopes_json {
            ScopePolicy::from_json(raw)
                .map_err(|e| ConfigError::Invalid(format!("role scope policy: {}", e)))?;
        }
        Ok(())
    }

    /// Build the scope policy from the configured document, or the built-in
    /// declarations when none is set.
    pub fn scope_policy(&self) -> Result<ScopePolicy, ConfigError> {
        match &self.role_scopes_json {
            Some(raw) => ScopePolicy::from_json(raw)
                .map_err(|e| ConfigError::Invalid(format!("role scope policy: {}", e))),
            None => Ok(ScopePolicy::with_defaults()),
        }
    }
}
