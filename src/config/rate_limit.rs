// Login rate limiting configuration
// Brute-force protection for the login path: windowed attempt counter plus
// a lockout once the threshold is crossed.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How rate-limit keys are derived for login attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RateLimitStrategy {
    /// Key on the client IP alone
    Ip,
    /// Key on client IP plus hashed username
    IpUser,
}

impl RateLimitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitStrategy::Ip => "IP",
            RateLimitStrategy::IpUser => "IP_USER",
        }
    }
}

impl FromStr for RateLimitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IP" => Ok(RateLimitStrategy::Ip),
            "IP_USER" => Ok(RateLimitStrategy::IpUser),
            other => Err(format!("Invalid rate limit strategy: {}", other)),
        }
    }
}

/// Settings for the login attempt policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub strategy: RateLimitStrategy,
    /// Attempts allowed inside the window before a block is set
    pub max_attempts: u32,
    /// Counting window in seconds
    pub window_seconds: u32,
    /// Lockout duration in seconds once the threshold is crossed
    pub block_seconds: u32,
    /// Path the limiter protects
    pub login_path: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::IpUser,
            max_attempts: 3,
            window_seconds: 60,
            block_seconds: 60,
            login_path: "/auth/login".to_string(),
        }
    }
}

impl RateLimitSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("rate limit max_attempts must be greater than 0".to_string());
        }
        if self.window_seconds == 0 {
            return Err("rate limit window_seconds must be greater than 0".to_string());
        }
        if self.block_seconds == 0 {
            return Err("rate limit block_seconds must be greater than 0".to_string());
        }
        if !self.login_path.starts_with('/') {
            return Err(format!(
                "rate limit login_path must be absolute, got `{}`",
                self.login_path
            ));
        }
        Ok(())
    }
}
