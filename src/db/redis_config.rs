// Redis connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
    pub pool_size: u32,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl RedisConfig {
    pub fn from_settings(settings: &crate::app_config::RedisSettings) -> Self {
        Self {
            redis_url: settings.url.clone(),
            pool_size: settings.pool_size,
            connection_timeout: Duration::from_secs(settings.connection_timeout),
            command_timeout: Duration::from_secs(settings.command_timeout),
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.redis_url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size too large (max: 1000)".to_string());
        }
        if self.connection_timeout.as_secs() == 0 {
            return Err("Connection timeout must be greater than 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("Retry attempts must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 8,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RedisConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_url_rejected() {
        let config = RedisConfig {
            redis_url: String::new(),
            ..RedisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_pool_rejected() {
        let config = RedisConfig {
            pool_size: 0,
            ..RedisConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
