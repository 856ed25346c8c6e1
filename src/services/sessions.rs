// Session inventory per user
// One sorted set per user: member = refresh jti, score = expiry epoch
// seconds. Reads always drop dead entries first, so the registry may only
// ever over-report between expiry and the next read.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::db::RedisPool;
use crate::utils::clock::SharedClock;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// An active refresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn register_session(
        &self,
        username: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SessionError>;

    async fn active_sessions(&self, username: &str) -> Result<Vec<SessionEntry>, SessionError>;

    /// Removing an unknown or already-expired jti is a no-op.
    async fn remove_session(&self, username: &str, jti: &str) -> Result<(), SessionError>;

    async fn remove_all(&self, username: &str) -> Result<usize, SessionError>;

    async fn count(&self, username: &str) -> Result<usize, SessionError>;
}

// =============================================================================
// REDIS IMPLEMENTATION
// =============================================================================

pub struct RedisSessionRegistry {
    pool: RedisPool,
    clock: SharedClock,
}

impl RedisSessionRegistry {
    pub fn new(pool: RedisPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    fn key(username: &str) -> String {
        format!("security:sessions:v1:{}", username)
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn register_session(
        &self,
        username: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut conn = self.pool.get_connection().await?;

        // Keep the set alive until its latest entry expires; a plain
        // EXPIREAT from this entry could shorten the life of longer ones.
        let script = redis::Script::new(
            r#"
            redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
            local last = redis.call('ZRANGE', KEYS[1], -1, -1, 'WITHSCORES')
            redis.call('EXPIREAT', KEYS[1], tonumber(last[2]) + 60)
            return 1
        "#,
        );

        let _: i64 = script
            .key(Self::key(username))
            .arg(expires_at.timestamp())
            .arg(jti)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn active_sessions(&self, username: &str) -> Result<Vec<SessionEntry>, SessionError> {
        let mut conn = self.pool.get_connection().await?;
        let key = Self::key(username);
        let now = self.clock.now().timestamp();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(&key, "-inf", now)
            .ignore()
            .cmd("ZRANGEBYSCORE")
            .arg(&key)
            .arg(format!("({}", now))
            .arg("+inf")
            .arg("WITHSCORES");

        let (entries,): (Vec<(String, i64)>,) = pipe.query_async(&mut conn).await?;

        Ok(entries
            .into_iter()
            .filter_map(|(jti, score)| {
                Utc.timestamp_opt(score, 0)
                    .single()
                    .map(|expires_at| SessionEntry { jti, expires_at })
            })
            .collect())
    }

    async fn remove_session(&self, username: &str, jti: &str) -> Result<(), SessionError> {
        let mut conn = self.pool.get_connection().await?;
        let _: i64 = redis::cmd("ZREM")
            .arg(Self::key(username))
            .arg(jti)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_all(&self, username: &str) -> Result<usize, SessionError> {
        let mut conn = self.pool.get_connection().await?;
        let now = self.clock.now().timestamp();

        // Count live entries and drop the set in one round trip
        let script = redis::Script::new(
            r#"
            redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
            local live = redis.call('ZCARD', KEYS[1])
            redis.call('DEL', KEYS[1])
            return live
        "#,
        );

        let live: i64 = script
            .key(Self::key(username))
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(live as usize)
    }

    async fn count(&self, username: &str) -> Result<usize, SessionError> {
        let mut conn = self.pool.get_connection().await?;
        let key = Self::key(username);
        let now = self.clock.now().timestamp();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(&key, "-inf", now)
            .ignore()
            .cmd("ZCARD")
            .arg(&key);

        let (count,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(count as usize)
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION (test profiles only)
// =============================================================================

pub struct InMemorySessionRegistry {
    sessions: std::sync::Mutex<HashMap<String, Vec<SessionEntry>>>,
    clock: SharedClock,
}

impl InMemorySessionRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sessions: std::sync::Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn purge(entries: &mut Vec<SessionEntry>, now: DateTime<Utc>) {
        entries.retain(|entry| entry.expires_at > now);
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn register_session(
        &self,
        username: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let entries = sessions.entry(username.to_string()).or_default();
        entries.retain(|entry| entry.jti != jti);
        entries.push(SessionEntry {
            jti: jti.to_string(),
            expires_at,
        });
        Ok(())
    }

    async fn active_sessions(&self, username: &str) -> Result<Vec<SessionEntry>, SessionError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().expect("session lock");

        match sessions.get_mut(username) {
            Some(entries) => {
                Self::purge(entries, now);
                let mut active = entries.clone();
                active.sort_by(|a, b| a.jti.cmp(&b.jti));
                Ok(active)
            },
            None => Ok(Vec::new()),
        }
    }

    async fn remove_session(&self, username: &str, jti: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        if let Some(entries) = sessions.get_mut(username) {
            entries.retain(|entry| entry.jti != jti);
        }
        Ok(())
    }

    async fn remove_all(&self, username: &str) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().expect("session lock");

        match sessions.remove(username) {
            Some(mut entries) => {
                Self::purge(&mut entries, now);
                Ok(entries.len())
            },
            None => Ok(0),
        }
    }

    async fn count(&self, username: &str) -> Result<usize, SessionError> {
        Ok(self.active_sessions(username).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::{Clock, ManualClock};
    use chrono::Duration;
    use std::sync::Arc;

    fn registry() -> (ManualClock, InMemorySessionRegistry) {
        let manual = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let registry = InMemorySessionRegistry::new(Arc::new(manual.clone()));
        (manual, registry)
    }

    #[tokio::test]
    async fn register_and_enumerate() {
        let (clock, registry) = registry();
        let exp = clock.now() + Duration::hours(1);

        registry.register_session("admin", "jti-1", exp).await.unwrap();
        registry.register_session("admin", "jti-2", exp).await.unwrap();

        let active = registry.active_sessions("admin").await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(registry.count("admin").await.unwrap(), 2);
        assert_eq!(registry.count("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reads_filter_expired_entries() {
        let (clock, registry) = registry();

        registry
            .register_session("admin", "short", clock.now() + Duration::minutes(5))
            .await
            .unwrap();
        registry
            .register_session("admin", "long", clock.now() + Duration::hours(2))
            .await
            .unwrap();

        clock.advance(Duration::minutes(6));

        let active = registry.active_sessions("admin").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].jti, "long");
        assert_eq!(registry.count("admin").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entry_expiring_exactly_now_is_gone() {
        let (clock, registry) = registry();
        let exp = clock.now() + Duration::minutes(5);
        registry.register_session("admin", "jti-1", exp).await.unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(registry.count("admin").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_session_is_a_noop_for_unknown_jti() {
        let (clock, registry) = registry();
        registry
            .register_session("admin", "jti-1", clock.now() + Duration::hours(1))
            .await
            .unwrap();

        registry.remove_session("admin", "jti-1").await.unwrap();
        registry.remove_session("admin", "jti-1").await.unwrap();
        registry.remove_session("ghost", "jti-9").await.unwrap();

        assert_eq!(registry.count("admin").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_all_reports_live_sessions_only() {
        let (clock, registry) = registry();
        registry
            .register_session("admin", "live", clock.now() + Duration::hours(1))
            .await
            .unwrap();
        registry
            .register_session("admin", "dead", clock.now() + Duration::minutes(1))
            .await
            .unwrap();

        clock.advance(Duration::minutes(2));
        assert_eq!(registry.remove_all("admin").await.unwrap(), 1);
        assert_eq!(registry.count("admin").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn re_registering_a_jti_replaces_its_expiry() {
        let (clock, registry) = registry();
        registry
            .register_session("admin", "jti-1", clock.now() + Duration::minutes(1))
            .await
            .unwrap();
        registry
            .register_session("admin", "jti-1", clock.now() + Duration::hours(1))
            .await
            .unwrap();

        clock.advance(Duration::minutes(2));
        assert_eq!(registry.count("admin").await.unwrap(), 1);
    }
}
