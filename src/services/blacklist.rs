// Revoked-jti tombstones
// A tombstone lives exactly as long as the token it kills; once the token
// would have expired anyway the entry evaporates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use thiserror::Error;

use crate::db::RedisPool;
use crate::utils::clock::SharedClock;

#[derive(Error, Debug)]
pub enum BlacklistError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Revocation tombstones keyed by jti. `revoke` is idempotent; `is_revoked`
/// is a single existence probe.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), BlacklistError>;
    async fn is_revoked(&self, jti: &str) -> Result<bool, BlacklistError>;
}

// =============================================================================
// REDIS IMPLEMENTATION
// =============================================================================

pub struct RedisTokenBlacklist {
    pool: RedisPool,
    clock: SharedClock,
}

impl RedisTokenBlacklist {
    pub fn new(pool: RedisPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    fn key(jti: &str) -> String {
        format!("security:blacklist:jti:{}", jti)
    }
}

#[async_trait]
impl TokenBlacklist for RedisTokenBlacklist {
    async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), BlacklistError> {
        let ttl = (expires_at - self.clock.now()).num_seconds();
        if ttl <= 0 {
            // Token is already past its lifetime, nothing to tombstone
            return Ok(());
        }

        let mut conn = self.pool.get_connection().await?;
        let _: () = conn.set_ex(Self::key(jti), "1", ttl as u64).await?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, BlacklistError> {
        let mut conn = self.pool.get_connection().await?;
        let exists: bool = conn.exists(Self::key(jti)).await?;
        Ok(exists)
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION (test profiles only)
// =============================================================================

pub struct InMemoryTokenBlacklist {
    entries: std::sync::Mutex<HashMap<String, DateTime<Utc>>>,
    clock: SharedClock,
}

impl InMemoryTokenBlacklist {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl TokenBlacklist for InMemoryTokenBlacklist {
    async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), BlacklistError> {
        let now = self.clock.now();
        if expires_at <= now {
            return Ok(());
        }

        let mut entries = self.entries.lock().expect("blacklist lock");
        entries.insert(jti.to_string(), expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, BlacklistError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("blacklist lock");
        entries.retain(|_, expires_at| *expires_at > now);
        Ok(entries.contains_key(jti))
    }
}
