// Refresh token store with family chaining
// Production backend is Redis: one hash per record with TTL, plus family and
// user index sets. Family revocation and the consume-once mark are the
// serialization points for rotation, so both run server-side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::db::RedisPool;
use crate::models::refresh_token::{RecordFieldError, RefreshTokenRecord};
use crate::utils::clock::SharedClock;

/// Records outlive their expiry by this long so an expired token is reported
/// as expired rather than unknown before garbage collection removes it.
const RECORD_GC_GRACE_SECONDS: u64 = 3600;

#[derive(Error, Debug)]
pub enum RefreshStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt refresh token record: {0}")]
    Corrupt(#[from] RecordFieldError),
}

/// Persistence contract for refresh-token metadata.
///
/// `revoke_family` is atomic from the caller's viewpoint: after it returns,
/// no reader observes a member of the family as non-revoked. `consume_once`
/// is first-consumer-wins and is the sole serialization point of rotation.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn save(&self, record: &RefreshTokenRecord) -> Result<(), RefreshStoreError>;

    async fn find_by_jti(
        &self,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, RefreshStoreError>;

    /// Mark a single record revoked. Returns whether a live record was hit.
    async fn revoke(&self, jti: &str) -> Result<bool, RefreshStoreError>;

    /// Mark every record of the family revoked. Returns how many flipped.
    async fn revoke_family(&self, family_id: &str) -> Result<usize, RefreshStoreError>;

    async fn delete_all_for_user(&self, username: &str) -> Result<usize, RefreshStoreError>;

    async fn find_all_for_user(&self, username: &str) -> Result<Vec<String>, RefreshStoreError>;

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, RefreshStoreError>;

    /// First-consumer-wins mark for one rotation of `jti`. True exactly once.
    async fn consume_once(&self, jti: &str, ttl_seconds: u64)
        -> Result<bool, RefreshStoreError>;
}

// =============================================================================
// REDIS IMPLEMENTATION
// =============================================================================

pub struct RedisRefreshTokenStore {
    pool: RedisPool,
    issuer: String,
    clock: SharedClock,
}

impl RedisRefreshTokenStore {
    pub fn new(pool: RedisPool, issuer: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            pool,
            issuer: issuer.into(),
            clock,
        }
    }

    fn record_key(&self, jti: &str) -> String {
        format!("security:refresh:token:{}:{}", self.issuer, jti)
    }

    fn family_key(&self, family_id: &str) -> String {
        format!("security:refresh:family:{}:{}", self.issuer, family_id)
    }

    fn user_key(&self, username: &str) -> String {
        format!("security:refresh:user:{}:{}", self.issuer, username)
    }

    fn consumed_key(&self, jti: &str) -> String {
        format!("security:refresh:consumed:{}:{}", self.issuer, jti)
    }
}

#[async_trait]
impl RefreshTokenStore for RedisRefreshTokenStore {
    async fn save(&self, record: &RefreshTokenRecord) -> Result<(), RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        let ttl = record.remaining_seconds(self.clock.now()) + RECORD_GC_GRACE_SECONDS;
        let fields = record.to_fields();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(self.record_key(&record.jti), &fields)
            .expire(self.record_key(&record.jti), ttl as i64)
            .sadd(self.family_key(&record.family_id), &record.jti)
            .expire(self.family_key(&record.family_id), ttl as i64)
            .sadd(self.user_key(&record.username), &record.jti)
            .expire(self.user_key(&record.username), ttl as i64);

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn find_by_jti(
        &self,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        let fields: HashMap<String, String> = conn.hgetall(self.record_key(jti)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(RefreshTokenRecord::from_fields(&fields)?))
    }

    async fn revoke(&self, jti: &str) -> Result<bool, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        let script = redis::Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 1 then
                redis.call('HSET', KEYS[1], 'revoked', '1')
                return 1
            end
            return 0
        "#,
        );

        let flipped: i64 = script
            .key(self.record_key(jti))
            .invoke_async(&mut conn)
            .await?;
        Ok(flipped == 1)
    }

    async fn revoke_family(&self, family_id: &str) -> Result<usize, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        // Single script: no reader can observe a partially revoked family.
        let script = redis::Script::new(
            r#"
            local prefix = ARGV[1]
            local revoked = 0
            local members = redis.call('SMEMBERS', KEYS[1])
            for _, jti in ipairs(members) do
                local record_key = prefix .. jti
                if redis.call('EXISTS', record_key) == 1 then
                    if redis.call('HGET', record_key, 'revoked') ~= '1' then
                        redis.call('HSET', record_key, 'revoked', '1')
                        revoked = revoked + 1
                    end
                else
                    redis.call('SREM', KEYS[1], jti)
                end
            end
            return revoked
        "#,
        );

        let record_prefix = format!("security:refresh:token:{}:", self.issuer);
        let revoked: i64 = script
            .key(self.family_key(family_id))
            .arg(record_prefix)
            .invoke_async(&mut conn)
            .await?;

        debug!(family_id = family_id, revoked = revoked, "family revoked");
        Ok(revoked as usize)
    }

    async fn delete_all_for_user(&self, username: &str) -> Result<usize, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        let script = redis::Script::new(
            r#"
            local prefix = ARGV[1]
            local deleted = 0
            local members = redis.call('SMEMBERS', KEYS[1])
            for _, jti in ipairs(members) do
                deleted = deleted + redis.call('DEL', prefix .. jti)
            end
            redis.call('DEL', KEYS[1])
            return deleted
        "#,
        );

        let record_prefix = format!("security:refresh:token:{}:", self.issuer);
        let deleted: i64 = script
            .key(self.user_key(username))
            .arg(record_prefix)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted as usize)
    }

    async fn find_all_for_user(&self, username: &str) -> Result<Vec<String>, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        // Drop index members whose record already expired away.
        let script = redis::Script::new(
            r#"
            local prefix = ARGV[1]
            local live = {}
            local members = redis.call('SMEMBERS', KEYS[1])
            for _, jti in ipairs(members) do
                if redis.call('EXISTS', prefix .. jti) == 1 then
                    table.insert(live, jti)
                else
                    redis.call('SREM', KEYS[1], jti)
                end
            end
            return live
        "#,
        );

        let record_prefix = format!("security:refresh:token:{}:", self.issuer);
        let live: Vec<String> = script
            .key(self.user_key(username))
            .arg(record_prefix)
            .invoke_async(&mut conn)
            .await?;
        Ok(live)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        // TTLs do the production garbage collection; this sweep exists for
        // ops tooling and tests.
        let pattern = format!("security:refresh:token:{}:*", self.issuer);
        let mut deleted = 0usize;
        let mut cursor = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let expires_at: Option<String> = conn.hget(&key, "expires_at").await?;
                if let Some(raw) = expires_at {
                    if raw
                        .parse::<i64>()
                        .map(|ts| ts <= before.timestamp())
                        .unwrap_or(true)
                    {
                        let removed: i64 = conn.del(&key).await?;
                        deleted += removed as usize;
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }

    async fn consume_once(
        &self,
        jti: &str,
        ttl_seconds: u64,
    ) -> Result<bool, RefreshStoreError> {
        let mut conn = self.pool.get_connection().await?;

        let ttl = ttl_seconds.max(1);
        let set: Option<String> = redis::cmd("SET")
            .arg(self.consumed_key(jti))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;

        Ok(set.is_some())
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION (test profiles only)
// =============================================================================

#[derive(Debug)]
struct InMemoryState {
    records: HashMap<String, RefreshTokenRecord>,
    consumed: HashMap<String, DateTime<Utc>>,
}

/// Mutex-guarded map, for test profiles. Mirrors the Redis lifecycle: records
/// remain visible for a grace period after expiry so expiry can be observed.
pub struct InMemoryRefreshTokenStore {
    state: std::sync::Mutex<InMemoryState>,
    clock: SharedClock,
}

impl InMemoryRefreshTokenStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: std::sync::Mutex::new(InMemoryState {
                records: HashMap::new(),
                consumed: HashMap::new(),
            }),
            clock,
        }
    }

    fn purge(state: &mut InMemoryState, now: DateTime<Utc>) {
        state.records.retain(|_, rec| {
            rec.remaining_seconds(now) > 0
                || (now - rec.expires_at).num_seconds() < RECORD_GC_GRACE_SECONDS as i64
        });
        state.consumed.retain(|_, until| *until > now);
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn save(&self, record: &RefreshTokenRecord) -> Result<(), RefreshStoreError> {
        let mut state = self.state.lock().expect("refresh store lock");
        state.records.insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn find_by_jti(
        &self,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, RefreshStoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("refresh store lock");
        Self::purge(&mut state, now);
        Ok(state.records.get(jti).cloned())
    }

    async fn revoke(&self, jti: &str) -> Result<bool, RefreshStoreError> {
        let mut state = self.state.lock().expect("refresh store lock");
        match state.records.get_mut(jti) {
            Some(rec) => {
                rec.revoked = true;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn revoke_family(&self, family_id: &str) -> Result<usize, RefreshStoreError> {
        let mut state = self.state.lock().expect("refresh store lock");
        let mut revoked = 0;
        for rec in state.records.values_mut() {
            if rec.family_id == family_id && !rec.revoked {
                rec.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_all_for_user(&self, username: &str) -> Result<usize, RefreshStoreError> {
        let mut state = self.state.lock().expect("refresh store lock");
        let before = state.records.len();
        state.records.retain(|_, rec| rec.username != username);
        Ok(before - state.records.len())
    }

    async fn find_all_for_user(&self, username: &str) -> Result<Vec<String>, RefreshStoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("refresh store lock");
        Self::purge(&mut state, now);

        let mut jtis: Vec<String> = state
            .records
            .values()
            .filter(|rec| rec.username == username)
            .map(|rec| rec.jti.clone())
            .collect();
        jtis.sort_unstable();
        Ok(jtis)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, RefreshStoreError> {
        let mut state = self.state.lock().expect("refresh store lock");
        let count = state.records.len();
        state.records.retain(|_, rec| rec.expires_at > before);
        Ok(count - state.records.len())
    }

    async fn consume_once(
        &self,
        jti: &str,
        ttl_seconds: u64,
    ) -> Result<bool, RefreshStoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("refresh store lock");
        Self::purge(&mut state, now);

        if state.consumed.contains_key(jti) {
            return Ok(false);
        }
        state.consumed.insert(
            jti.to_string(),
            now + chrono::Duration::seconds(ttl_seconds.max(1) as i64),
        );
        Ok(true)
    }
}
