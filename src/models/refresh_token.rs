// Refresh token metadata record
// Every record belongs to a family; rotation chains records through
// previous_jti back to the family's initial token. Once any member is
// observed revoked and presented again, the whole family dies.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Refresh token record with family chaining
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    pub jti: String,
    pub username: String,
    pub family_id: String,
    /// None for the family's initial token
    pub previous_jti: Option<String>,
    pub revoked: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum RecordFieldError {
    #[error("missing field `{0}` in refresh token record")]
    Missing(&'static str),

    #[error("malformed field `{0}` in refresh token record")]
    Malformed(&'static str),
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Remaining lifetime in whole seconds, zero when already expired.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        let remaining = (self.expires_at - now).num_seconds();
        if remaining < 0 {
            0
        } else {
            remaining as u64
        }
    }

    /// Flatten into field pairs for a Redis hash.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("jti", self.jti.clone()),
            ("username", self.username.clone()),
            ("family_id", self.family_id.clone()),
            ("revoked", if self.revoked { "1" } else { "0" }.to_string()),
            ("issued_at", self.issued_at.timestamp().to_string()),
            ("expires_at", self.expires_at.timestamp().to_string()),
        ];
        if let Some(prev) = &self.previous_jti {
            fields.push(("previous_jti", prev.clone()));
        }
        if let Some(ip) = &self.client_ip {
            fields.push(("client_ip", ip.clone()));
        }
        if let Some(agent) = &self.user_agent {
            fields.push(("user_agent", agent.clone()));
        }
        fields
    }

    /// Rebuild from a Redis hash.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, RecordFieldError> {
        fn required<'a>(
            fields: &'a HashMap<String, String>,
            name: &'static str,
        ) -> Result<&'a String, RecordFieldError> {
            fields.get(name).ok_or(RecordFieldError::Missing(name))
        }

        fn timestamp(
            fields: &HashMap<String, String>,
            name: &'static str,
        ) -> Result<DateTime<Utc>, RecordFieldError> {
            let raw = required(fields, name)?;
            let seconds: i64 = raw
                .parse()
                .map_err(|_| RecordFieldError::Malformed(name))?;
            Utc.timestamp_opt(seconds, 0)
                .single()
                .ok_or(RecordFieldError::Malformed(name))
        }

        Ok(Self {
            jti: required(fields, "jti")?.clone(),
            username: required(fields, "username")?.clone(),
            family_id: required(fields, "family_id")?.clone(),
            previous_jti: fields.get("previous_jti").cloned(),
            revoked: required(fields, "revoked")? == "1",
            issued_at: timestamp(fields, "issued_at")?,
            expires_at: timestamp(fields, "expires_at")?,
            client_ip: fields.get("client_ip").cloned(),
            user_agent: fields.get("user_agent").cloned(),
        })
    }
}
