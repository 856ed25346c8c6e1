// Brute-force protection: windowed attempt counter plus lockout
// The check-increment-block sequence runs as one atomic action against the
// backing store; the retry-after surfaced on block is the store's actual
// remaining TTL, never a config constant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::rate_limit::RateLimitSettings;
use crate::db::RedisPool;
use crate::utils::clock::SharedClock;

#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of one registered attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptDecision {
    pub allowed: bool,
    /// Remaining lockout in seconds; zero when allowed
    pub retry_after_seconds: u64,
}

impl AttemptDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    fn blocked(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds,
        }
    }
}

#[async_trait]
pub trait LoginAttemptPolicy: Send + Sync {
    async fn register_attempt(&self, key: &str) -> Result<AttemptDecision, AttemptError>;
    async fn reset_attempts(&self, key: &str) -> Result<(), AttemptError>;
}

// =============================================================================
// REDIS IMPLEMENTATION
// =============================================================================

pub struct RedisLoginAttemptPolicy {
    pool: RedisPool,
    settings: RateLimitSettings,
}

impl RedisLoginAttemptPolicy {
    pub fn new(pool: RedisPool, settings: RateLimitSettings) -> Self {
        Self { pool, settings }
    }

    fn attempts_key(key: &str) -> String {
        format!("login:attempts:{}", key)
    }

    fn block_key(key: &str) -> String {
        format!("login:block:{}", key)
    }
}

#[async_trait]
impl LoginAttemptPolicy for RedisLoginAttemptPolicy {
    async fn register_attempt(&self, key: &str) -> Result<AttemptDecision, AttemptError> {
        let mut conn = self.pool.get_connection().await?;

        // Check block, increment, and set block as a single atomic action.
        // A plain INCR-then-EXPIRE would race across instances.
        let script = redis::Script::new(
            r#"
            local attempts_key = KEYS[1]
            local block_key = KEYS[2]
            local max_attempts = tonumber(ARGV[1])
            local window = tonumber(ARGV[2])
            local block = tonumber(ARGV[3])

            local block_ttl = redis.call('TTL', block_key)
            if block_ttl > 0 then
                return {0, block_ttl}
            end

            local attempts = redis.call('INCR', attempts_key)
            if attempts == 1 then
                redis.call('EXPIRE', attempts_key, window)
            end

            if attempts > max_attempts then
                redis.call('SET', block_key, '1', 'EX', block)
                redis.call('DEL', attempts_key)
                return {0, block}
            end

            return {1, 0}
        "#,
        );

        let result: Vec<i64> = script
            .key(Self::attempts_key(key))
            .key(Self::block_key(key))
            .arg(self.settings.max_attempts)
            .arg(self.settings.window_seconds)
            .arg(self.settings.block_seconds)
            .invoke_async(&mut conn)
            .await?;

        if result.first() == Some(&1) {
            Ok(AttemptDecision::allowed())
        } else {
            let retry_after = result.get(1).copied().unwrap_or(0).max(0) as u64;
            Ok(AttemptDecision::blocked(retry_after))
        }
    }

    async fn reset_attempts(&self, key: &str) -> Result<(), AttemptError> {
        let mut conn = self.pool.get_connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(Self::attempts_key(key))
            .arg(Self::block_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION (test profiles only)
// =============================================================================

#[derive(Debug, Clone)]
struct AttemptEntry {
    attempts: u32,
    window_expires_at: DateTime<Utc>,
    block_until: Option<DateTime<Utc>>,
}

/// Mutex-guarded equivalent of the Lua script, driven by the injected clock.
pub struct InMemoryLoginAttemptPolicy {
    entries: std::sync::Mutex<HashMap<String, AttemptEntry>>,
    settings: RateLimitSettings,
    clock: SharedClock,
}

impl InMemoryLoginAttemptPolicy {
    pub fn new(settings: RateLimitSettings, clock: SharedClock) -> Self {
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
            settings,
            clock,
        }
    }
}

fn remaining_whole_seconds(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

#[async_trait]
impl LoginAttemptPolicy for InMemoryLoginAttemptPolicy {
    async fn register_attempt(&self, key: &str) -> Result<AttemptDecision, AttemptError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("attempt lock");

        let entry = entries.entry(key.to_string()).or_insert(AttemptEntry {
            attempts: 0,
            window_expires_at: now,
            block_until: None,
        });

        if let Some(block_until) = entry.block_until {
            let remaining = remaining_whole_seconds(block_until, now);
            if remaining > 0 {
                return Ok(AttemptDecision::blocked(remaining));
            }
            entry.block_until = None;
            entry.attempts = 0;
        }

        if entry.window_expires_at <= now {
            entry.attempts = 0;
        }

        entry.attempts += 1;
        if entry.attempts == 1 {
            entry.window_expires_at =
                now + chrono::Duration::seconds(self.settings.window_seconds as i64);
        }

        if entry.attempts > self.settings.max_attempts {
            entry.block_until =
                Some(now + chrono::Duration::seconds(self.settings.block_seconds as i64));
            entry.attempts = 0;
            return Ok(AttemptDecision::blocked(self.settings.block_seconds as u64));
        }

        Ok(AttemptDecision::allowed())
    }

    async fn reset_attempts(&self, key: &str) -> Result<(), AttemptError> {
        let mut entries = self.entries.lock().expect("attempt lock");
        entries.remove(key);
        Ok(())
    }
}
